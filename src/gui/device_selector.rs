use std::{io::stdout, path::PathBuf, time::Duration};

use crate::gui::error::StimGuiError;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// What a key press does to the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Move(usize),
    Select(usize),
    Quit,
    Ignore,
}

fn handle_key(code: KeyCode, cursor: usize, n_ports: usize) -> Action {
    match code {
        KeyCode::Down | KeyCode::Char('j') => Action::Move((cursor + 1) % n_ports),
        KeyCode::Up | KeyCode::Char('k') => Action::Move((cursor + n_ports - 1) % n_ports),
        KeyCode::Enter => Action::Select(cursor),
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        _ => Action::Ignore,
    }
}

/// Lets the experimenter pick the thermal actuator's serial device from
/// `available_ports`. Returns `None` if they quit without choosing.
pub fn device_selector(
    mut available_ports: Vec<PathBuf>,
) -> Result<Option<PathBuf>, StimGuiError> {
    if available_ports.is_empty() {
        return Err(StimGuiError::NoPorts);
    }

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let selected = run_selector(&available_ports);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(selected?.map(|i| available_ports.swap_remove(i)))
}

fn run_selector(available_ports: &[PathBuf]) -> Result<Option<usize>, StimGuiError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let n_ports = available_ports.len();
    let mut cursor = 0;
    let mut list_state = ListState::default().with_selected(Some(cursor));
    loop {
        let title = Title::from(" Thermal Actuator Port ".magenta().bold());
        let instructions = Title::from(Line::from(vec![
            " Navigate ".into(),
            "<Up>/<Down>".magenta().bold(),
            " Select ".into(),
            "<Enter>".magenta().bold(),
            " Quit ".into(),
            "<Q> ".magenta().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let port_names = available_ports.iter().map(|p| p.to_string_lossy());
        let list = List::new(port_names)
            .style(Style::default().fg(Color::White))
            .highlight_symbol(">>")
            .highlight_style(Style::default().fg(Color::Magenta))
            .block(block);
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(list, area, &mut list_state);
        })?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match handle_key(key.code, cursor, n_ports) {
                        Action::Move(next) => cursor = next,
                        Action::Select(i) => return Ok(Some(i)),
                        Action::Quit => return Ok(None),
                        Action::Ignore => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_both_ways() {
        assert_eq!(handle_key(KeyCode::Down, 2, 3), Action::Move(0));
        assert_eq!(handle_key(KeyCode::Up, 0, 3), Action::Move(2));
        assert_eq!(handle_key(KeyCode::Char('j'), 0, 3), Action::Move(1));
    }

    #[test]
    fn enter_selects_and_q_quits() {
        assert_eq!(handle_key(KeyCode::Enter, 1, 3), Action::Select(1));
        assert_eq!(handle_key(KeyCode::Char('q'), 1, 3), Action::Quit);
        assert_eq!(handle_key(KeyCode::Tab, 1, 3), Action::Ignore);
    }

    #[test]
    fn empty_port_list_is_refused() {
        assert!(matches!(device_selector(Vec::new()), Err(StimGuiError::NoPorts)));
    }
}
