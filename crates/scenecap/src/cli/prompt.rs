//! Line-oriented terminal prompts.
//!
//! Generic over the reader and writer so menus can be driven from tests.

use std::io::{self, BufRead, BufReader, Read, Write};

/// Process stdin, locked per read so a cancel poller can still read it
/// while a menu is open.
#[derive(Debug, Default)]
pub struct TerminalInput;

impl Read for TerminalInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::stdin().read(buf)
    }
}

/// Terminal input plus output.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<BufReader<TerminalInput>, io::Stdout> {
    pub fn stdio() -> Self {
        // Unread bytes stay in stdin's own buffer
        Self::new(BufReader::with_capacity(1, TerminalInput), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn output(&mut self) -> &mut W {
        &mut self.output
    }

    /// Print `message` and read one trimmed line. `None` at end of input.
    pub fn read_line(&mut self, message: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", message)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Numbered menu. Returns the zero-based index chosen, or `None` when the
    /// operator enters nothing. Invalid input re-prompts.
    pub fn select(&mut self, title: &str, items: &[String]) -> io::Result<Option<usize>> {
        Ok(self.menu(title, items, None)?.and_then(|selection| match selection {
            Selection::One(index) => Some(index),
            Selection::All => None,
        }))
    }

    /// Like [`select`](Self::select) with an extra `0` entry labelled
    /// `all_label`.
    pub fn select_or_all(
        &mut self,
        title: &str,
        items: &[String],
        all_label: &str,
    ) -> io::Result<Option<Selection>> {
        self.menu(title, items, Some(all_label))
    }

    fn menu(
        &mut self,
        title: &str,
        items: &[String],
        all_label: Option<&str>,
    ) -> io::Result<Option<Selection>> {
        loop {
            writeln!(self.output)?;
            writeln!(self.output, "{}", title)?;
            if let Some(label) = all_label {
                writeln!(self.output, "  0. {}", label)?;
            }
            for (i, item) in items.iter().enumerate() {
                writeln!(self.output, "  {}. {}", i + 1, item)?;
            }

            let Some(answer) = self.read_line("Choice (Enter to go back): ")? else {
                return Ok(None);
            };
            if answer.is_empty() {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(0) if all_label.is_some() => return Ok(Some(Selection::All)),
                Ok(n) if (1..=items.len()).contains(&n) => return Ok(Some(Selection::One(n - 1))),
                _ => writeln!(self.output, "Invalid choice '{}'", answer)?,
            }
        }
    }

    /// y/n question; anything else re-prompts, end of input means no.
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        loop {
            let Some(answer) = self.read_line(&format!("{} (y/n): ", question))? else {
                return Ok(false);
            };
            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n")?,
            }
        }
    }
}

/// A menu answer that may cover every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    One(usize),
}
