//! Console line parsing.

/// One console line, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `recipient: text`
    Send {
        /// Who to send to
        recipient: String,
        /// Message body
        text: String,
    },
    /// `exit`
    Exit,
    /// Blank or unparseable input.
    Ignored,
}

/// Parse one line typed at the console.
///
/// The recipient is everything before the first `:`. A single space after
/// the colon is dropped; the rest of the line is the message verbatim.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim() == "exit" {
        return Command::Exit;
    }

    let Some((recipient, text)) = line.split_once(':') else {
        return Command::Ignored;
    };
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Command::Ignored;
    }

    let text = text.strip_prefix(' ').unwrap_or(text);
    Command::Send { recipient: recipient.to_string(), text: text.to_string() }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn send(recipient: &str, text: &str) -> Command {
        Command::Send { recipient: recipient.to_string(), text: text.to_string() }
    }

    #[test]
    fn parses_recipient_and_text() {
        assert_eq!(parse_command("bob: hello there"), send("bob", "hello there"));
        assert_eq!(parse_command("bob:hi"), send("bob", "hi"));
        assert_eq!(parse_command("bob: time is 10:30\n"), send("bob", "time is 10:30"));
    }

    #[test]
    fn exit_and_noise() {
        assert_eq!(parse_command("exit"), Command::Exit);
        assert_eq!(parse_command("exit\n"), Command::Exit);
        assert_eq!(parse_command(""), Command::Ignored);
        assert_eq!(parse_command("no colon here"), Command::Ignored);
        assert_eq!(parse_command(": orphan"), Command::Ignored);
    }

    proptest! {
        #[test]
        fn text_survives_verbatim(
            recipient in "[a-z]{1,12}",
            text in "[^\r\n]{0,40}",
        ) {
            let line = format!("{recipient}: {text}");
            prop_assert_eq!(parse_command(&line), send(&recipient, &text));
        }
    }
}
