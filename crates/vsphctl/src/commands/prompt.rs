use std::cell::Cell;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use vsphere_manager::{QuestionPrompt, TaskState, VmQuestion, VsphereError};

const WRAP_WIDTH: usize = 60;
const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Answers VM questions interactively on the terminal.
#[derive(Default)]
pub struct StdinPrompt {
    tick: Cell<usize>,
}

impl StdinPrompt {
    /// Ends the spinner line.
    pub fn finish(&self) {
        if self.tick.get() > 0 {
            println!();
        }
    }
}

impl QuestionPrompt for StdinPrompt {
    async fn answer(&self, question: &VmQuestion) -> vsphere_manager::Result<String> {
        println!();
        println!();
        for line in wrap(&question.text, WRAP_WIDTH) {
            println!("{line}");
        }
        for choice in &question.choices {
            println!("  {}: {}", choice.key, choice.label);
        }

        let mut stdin = BufReader::new(tokio::io::stdin());
        loop {
            match question.default_choice() {
                Some(d) => print!("Answer [{}: {}]: ", d.key, d.label),
                None => print!("Answer: "),
            }
            std::io::stdout().flush()?;

            let mut line = String::new();
            if stdin.read_line(&mut line).await? == 0 {
                return Err(VsphereError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stdin closed before the VM question was answered",
                )));
            }

            match resolve_choice(question, &line) {
                Some(key) => return Ok(key),
                None => println!("'{}' is not one of the offered choices", line.trim()),
            }
        }
    }

    fn progress(&self, state: TaskState) {
        let tick = self.tick.get();
        print!("\r\t{state} {}", SPINNER[tick % SPINNER.len()]);
        let _ = std::io::stdout().flush();
        self.tick.set(tick + 1);
    }
}

/// The key selected by `input`; empty input picks the default choice, if any.
pub fn resolve_choice(question: &VmQuestion, input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return question.default_choice().map(|c| c.key.clone());
    }
    question
        .is_valid_choice(input)
        .then(|| input.to_string())
}

/// Greedy word wrap. Existing line breaks are kept; overlong words get a line of their own.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        let mut columns = 0;
        for word in paragraph.split_whitespace() {
            let word_columns = word.chars().count();
            if columns > 0 && columns + 1 + word_columns > width {
                lines.push(std::mem::take(&mut current));
                columns = 0;
            }
            if columns > 0 {
                current.push(' ');
                columns += 1;
            }
            current.push_str(word);
            columns += word_columns;
        }
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsphere_manager::Choice;

    fn question(default_index: Option<usize>) -> VmQuestion {
        VmQuestion {
            id: "_vmx1".into(),
            text: "moved or copied?".into(),
            choices: vec![
                Choice {
                    key: "0".into(),
                    label: "Cancel".into(),
                },
                Choice {
                    key: "1".into(),
                    label: "I Moved It".into(),
                },
                Choice {
                    key: "2".into(),
                    label: "I Copied It".into(),
                },
            ],
            default_index,
        }
    }

    #[test]
    fn resolves_offered_keys_only() {
        let q = question(None);
        assert_eq!(resolve_choice(&q, "1\n").as_deref(), Some("1"));
        assert_eq!(resolve_choice(&q, " 2 ").as_deref(), Some("2"));
        assert_eq!(resolve_choice(&q, "3"), None);
        assert_eq!(resolve_choice(&q, "I Moved It"), None);
        assert_eq!(resolve_choice(&q, ""), None);
    }

    #[test]
    fn empty_input_takes_default() {
        let q = question(Some(2));
        assert_eq!(resolve_choice(&q, "\n").as_deref(), Some("2"));
    }

    #[test]
    fn wraps_at_width() {
        let text = "This virtual machine might have been moved or copied. In order to \
                    configure certain management and networking features, VMware ESX \
                    needs to know if this virtual machine was moved or copied.";
        let lines = wrap(text, 60);
        assert!(lines.len() > 2);
        assert!(lines.iter().all(|l| l.len() <= 60));
        assert_eq!(lines.join(" "), text.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn keeps_line_breaks_and_long_words() {
        let long = "x".repeat(70);
        let lines = wrap(&format!("first line\n{long} end"), 60);
        assert_eq!(lines, vec!["first line".to_string(), long, "end".to_string()]);
    }

    #[test]
    fn wraps_by_characters_not_bytes() {
        // 29 + 1 + 30 characters, but 118 bytes.
        let first = "é".repeat(29);
        let second = "ü".repeat(30);
        let lines = wrap(&format!("{first} {second} ende"), 60);
        assert_eq!(lines, vec![format!("{first} {second}"), "ende".to_string()]);
        assert!(lines.iter().all(|l| l.chars().count() <= 60));
    }
}
