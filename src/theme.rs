use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn from_is_dark(is_dark: bool) -> Self {
        if is_dark { Theme::Dark } else { Theme::Light }
    }

    pub fn is_dark(self) -> bool {
        matches!(self, Theme::Dark)
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => f.write_str("light"),
            Theme::Dark => f.write_str("dark"),
        }
    }
}

/// Owner side of the theme signal. Held by the page-facing handle; the
/// scene only ever sees a [`ThemeReader`].
#[derive(Debug)]
pub struct ThemePublisher {
    cell: Rc<Cell<Theme>>,
}

impl ThemePublisher {
    pub fn new(initial: Theme) -> Self {
        Self { cell: Rc::new(Cell::new(initial)) }
    }

    pub fn publish(&self, theme: Theme) {
        self.cell.set(theme);
    }

    pub fn current(&self) -> Theme {
        self.cell.get()
    }

    pub fn reader(&self) -> ThemeReader {
        ThemeReader { cell: Rc::clone(&self.cell), seen: None }
    }
}

/// Read-only view of the theme. Remembers the last value it reported
/// through [`ThemeReader::poll_change`].
#[derive(Debug)]
pub struct ThemeReader {
    cell: Rc<Cell<Theme>>,
    seen: Option<Theme>,
}

impl ThemeReader {
    pub fn current(&self) -> Theme {
        self.cell.get()
    }

    /// Returns the theme if it differs from the last one observed here.
    /// The first poll always reports.
    pub fn poll_change(&mut self) -> Option<Theme> {
        let now = self.cell.get();
        if self.seen == Some(now) {
            return None;
        }
        self.seen = Some(now);
        Some(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_first_value_then_only_changes() {
        let publisher = ThemePublisher::new(Theme::Dark);
        let mut reader = publisher.reader();

        assert_eq!(reader.poll_change(), Some(Theme::Dark));
        assert_eq!(reader.poll_change(), None);

        publisher.publish(Theme::Dark);
        assert_eq!(reader.poll_change(), None);

        publisher.publish(Theme::Light);
        assert_eq!(reader.current(), Theme::Light);
        assert_eq!(reader.poll_change(), Some(Theme::Light));
        assert_eq!(reader.poll_change(), None);
    }

    #[test]
    fn readers_track_changes_independently() {
        let publisher = ThemePublisher::new(Theme::Light);
        let mut a = publisher.reader();
        let mut b = publisher.reader();
        assert!(a.poll_change().is_some());

        publisher.publish(Theme::Dark);
        assert_eq!(a.poll_change(), Some(Theme::Dark));
        assert_eq!(b.poll_change(), Some(Theme::Dark));
        assert_eq!(Theme::from_is_dark(false), Theme::Light);
        assert_eq!(Theme::Dark.to_string(), "dark");
    }
}
