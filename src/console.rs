//! Line-oriented front-end used by the `pinmap` binary.

use std::io::Write;

use chrono::NaiveDate;

use crate::error::PinError;
use crate::models::{Pin, PinColor, PinId};
use crate::view::{PinView, Selection};

pub const IMAGE_WIDTH: f64 = 800.0;
pub const IMAGE_HEIGHT: f64 = 600.0;

pub const HELP: &str = "commands: color <red|blue|green|yellow|purple|orange> | click <x> <y> [<w> <h>] | \
select <id> | deselect | delete | list | logs [YYYY-MM-DD] | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Color(PinColor),
    Click { x: f64, y: f64, width: f64, height: f64 },
    Select(PinId),
    Deselect,
    Delete,
    List,
    Logs(Option<NaiveDate>),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty input")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("{0}")]
    Invalid(String),
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, ParseError> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else { return Err(ParseError::Empty) };
    let args: Vec<&str> = parts.collect();
    let num = |s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseError::Invalid(format!("'{s}' is not a number")))
    };
    match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("color", [c]) => c
            .parse::<PinColor>()
            .map(ConsoleCommand::Color)
            .map_err(|e| ParseError::Invalid(e.to_string())),
        ("click", [x, y]) => Ok(ConsoleCommand::Click {
            x: num(*x)?,
            y: num(*y)?,
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        }),
        ("click", [x, y, w, h]) => Ok(ConsoleCommand::Click { x: num(*x)?, y: num(*y)?, width: num(*w)?, height: num(*h)? }),
        ("select", [id]) => Ok(ConsoleCommand::Select(PinId::from(*id))),
        ("deselect", []) => Ok(ConsoleCommand::Deselect),
        ("delete", []) => Ok(ConsoleCommand::Delete),
        ("list", []) => Ok(ConsoleCommand::List),
        ("logs", []) => Ok(ConsoleCommand::Logs(None)),
        ("logs", [day]) => NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map(|d| ConsoleCommand::Logs(Some(d)))
            .map_err(|_| ParseError::Invalid(format!("'{day}' is not a YYYY-MM-DD date"))),
        ("help", _) => Ok(ConsoleCommand::Help),
        ("quit" | "exit", _) => Ok(ConsoleCommand::Quit),
        ("color" | "click" | "select" | "deselect" | "delete" | "list" | "logs", _) => {
            Err(ParseError::Invalid(format!("wrong arguments for '{head}'")))
        }
        _ => Err(ParseError::Unknown(head.to_string())),
    }
}

pub fn describe_pin(pin: &Pin) -> String {
    let at = match pin.position.normalized() {
        Some((x, y)) => format!("{:.1}%,{:.1}%", x * 100.0, y * 100.0),
        None => format!("{}px,{}px", pin.position.x, pin.position.y),
    };
    format!("{} {} at {} by {}", pin.id, pin.color, at, pin.created_by)
}

/// Writes view calls as text lines. Opacity updates are only reported once a
/// pin has fully faded.
pub struct ConsoleView<W: Write + Send> {
    out: W,
}

impl ConsoleView<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: std::io::stdout() }
    }
}

impl<W: Write + Send> ConsoleView<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> PinView for ConsoleView<W> {
    fn render_pin(&mut self, pin: &Pin, opacity: f64) {
        self.line(format_args!("+ {} (opacity {:.2})", describe_pin(pin), opacity));
    }

    fn rekey_pin(&mut self, old_id: &PinId, pin: &Pin) {
        self.line(format_args!("= {} is now {}", old_id, pin.id));
    }

    fn remove_pin_view(&mut self, id: &PinId) {
        self.line(format_args!("- {id}"));
    }

    fn update_opacity(&mut self, id: &PinId, value: f64) {
        if value <= 0.0 {
            self.line(format_args!("~ {id} faded"));
        }
    }

    fn show_selection(&mut self, selection: &Selection) {
        let permission = if selection.can_delete { "can delete" } else { "created by another user" };
        self.line(format_args!(
            "* {} placed {} ({})",
            describe_pin(&selection.pin),
            selection.created_at_label,
            permission
        ));
    }

    fn hide_selection(&mut self) {
        self.line(format_args!("* selection cleared"));
    }

    fn notify(&mut self, error: &PinError) {
        self.line(format_args!("! {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_click_with_default_image_size() {
        assert_eq!(
            parse_command("click 400 300").unwrap(),
            ConsoleCommand::Click { x: 400.0, y: 300.0, width: IMAGE_WIDTH, height: IMAGE_HEIGHT }
        );
    }

    #[test]
    fn parses_color_and_logs() {
        assert_eq!(parse_command("color Purple").unwrap(), ConsoleCommand::Color(PinColor::Purple));
        assert_eq!(
            parse_command("logs 2024-05-01").unwrap(),
            ConsoleCommand::Logs(NaiveDate::from_ymd_opt(2024, 5, 1))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse_command("   "), Err(ParseError::Empty));
        assert!(matches!(parse_command("click a b"), Err(ParseError::Invalid(_))));
        assert!(matches!(parse_command("select"), Err(ParseError::Invalid(_))));
        assert!(matches!(parse_command("fly"), Err(ParseError::Unknown(_))));
    }

    #[test]
    fn console_view_reports_only_full_fade() {
        let mut view = ConsoleView::new(Vec::new());
        view.update_opacity(&PinId::from("k1"), 0.4);
        view.update_opacity(&PinId::from("k1"), 0.0);
        view.notify(&PinError::NotOwner);
        let text = String::from_utf8(view.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("~ k1 faded"));
    }
}
