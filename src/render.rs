//! Output rendering for the chat REPL.
//!
//! Flushes from the reassembler are printed as they arrive; everything else (errors, notices,
//! session listings) goes through the same trait so the REPL can be pointed at any writer.

use std::io::{self, Write};

/// ANSI escape code for dim text (used for notices).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for yellow text (used for the stop marker).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print one flush of assistant text.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a reply has finished streaming.
    fn finish_response(&mut self);

    /// Called when the user stopped the reply.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Renderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Renderer on stdout.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }

    /// Renderer on an arbitrary writer.
    pub fn with_writer(out: impl Write + Send + 'static, use_color: bool) -> Self {
        Self {
            out: Box::new(out),
            use_color,
        }
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    fn write(&mut self, text: &str) {
        // A closed terminal is not worth failing a stream over.
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn styled(&mut self, style: &str, text: &str) {
        if self.use_color {
            self.write(&format!("{style}{text}{ANSI_RESET}"));
        } else {
            self.write(text);
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_error(&mut self, error: &str) {
        self.styled(ANSI_RED, &format!("Error: {error}"));
        self.write("\n");
    }

    fn print_info(&mut self, info: &str) {
        self.styled(ANSI_DIM, info);
        self.write("\n");
    }

    fn finish_response(&mut self) {
        self.write("\n");
    }

    fn print_interrupted(&mut self) {
        self.styled(ANSI_YELLOW, "\n[output stopped]");
        self.write("\n");
    }
}
