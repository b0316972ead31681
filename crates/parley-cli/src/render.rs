//! Terminal formatting of messages.

use parley_core::{Message, UserId};

/// One transcript line: `[HH:MM:SS] sender: content`, with `me` shown as `you`.
pub fn line(message: &Message, me: &UserId) -> String {
    let who = if message.from == *me {
        "you"
    } else {
        message.from.as_str()
    };
    format!(
        "[{}] {who}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.content
    )
}

/// Notice for a message that belongs to another conversation.
pub fn notification(message: &Message) -> String {
    format!("(new message from {})", message.from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parley_core::{MessageDraft, MessageId};

    fn message(from: &str, to: &str) -> Message {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap();
        Message::compose_at(MessageDraft::new(from, to, "hello"), MessageId::from("m1"), ts).unwrap()
    }

    #[test]
    fn own_messages_show_as_you() {
        let me = UserId::from("u1");
        assert_eq!(line(&message("u1", "u2"), &me), "[10:15:30] you: hello");
        assert_eq!(line(&message("u2", "u1"), &me), "[10:15:30] u2: hello");
    }

    #[test]
    fn notification_names_sender() {
        assert_eq!(notification(&message("u3", "u1")), "(new message from u3)");
    }
}
