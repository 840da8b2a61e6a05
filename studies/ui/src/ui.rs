use ratatui::{
    buffer::Buffer,
    layout::{ Alignment, Constraint, Direction, Layout, Rect },
    style::{ palette::tailwind, Color, Style },
    symbols,
    text::Text,
    widgets::{
        block::Title,
        Axis,
        Block,
        Borders,
        Cell,
        Chart,
        Dataset,
        Gauge,
        GraphType,
        Padding,
        Paragraph,
        Row,
        Table,
        Widget,
        Wrap,
    },
    DefaultTerminal,
};
use crossterm::event::{ self, Event, KeyCode, KeyEventKind };
use std::{ iter, time::Duration };
use color_eyre::Result;
use ratatui::prelude::Stylize;

use crate::state::{ EvalState, Heatmap, Progress, StateMutex };

const CUSTOM_LABEL_COLOR: Color = tailwind::SLATE.c200;

#[derive(Debug)]
pub struct App {
    pub state: AppState,
    pub state_nn: StateMutex,
    pub scroll_position: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    #[default]
    Running,
    Quitting,
}

impl App {
    pub fn new(state_nn: StateMutex) -> Self {
        Self {
            state: AppState::default(),
            state_nn,
            scroll_position: 0,
        }
    }

    pub fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        while self.state != AppState::Quitting {
            terminal.draw(|frame| frame.render_widget(&self, frame.area()))?;
            self.handle_events()?;
        }
        Ok(())
    }

    fn handle_events(&mut self) -> Result<()> {
        let timeout = Duration::from_secs_f32(1.0 / 20.0);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    self.on_key(key.code);
                }
            }
        }
        Ok(())
    }

    fn on_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit(),
            KeyCode::Down => {
                self.scroll_position = self.scroll_position.saturating_add(1);
            }
            KeyCode::Up => {
                self.scroll_position = self.scroll_position.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn quit(&mut self) {
        self.state = AppState::Quitting;
    }

    fn snapshot(&self) -> Option<EvalState> {
        self.state_nn
            .lock()
            .ok()
            .map(|state| state.clone())
    }
}

impl Widget for &App {
    #[allow(clippy::similar_names)]
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(state_nn) = self.snapshot() else {
            return;
        };

        let body = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([Constraint::Max(1), Constraint::Fill(2), Constraint::Max(1)].as_ref())
            .split(area);

        let container = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([Constraint::Length(3), Constraint::Fill(1)].as_ref())
            .split(body[1]);

        let section_info = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(44), Constraint::Fill(1)].as_ref())
            .split(container[1]);

        let section_tables = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(9), Constraint::Fill(1)].as_ref())
            .split(section_info[0]);

        let section_figures = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
            .split(section_info[1]);

        render_header(&state_nn.model, body[0], buf);
        render_footer(body[2], buf);
        render_progress(&state_nn.progress, container[0], buf);

        render_table_metrics(&state_nn, section_tables[0], buf);
        self.render_table_history(&state_nn, section_tables[1], buf);
        render_metric_graph(&state_nn, section_figures[0], buf);
        render_heatmap(
            state_nn.heatmap.as_ref(),
            state_nn.progress.failed.as_deref(),
            section_figures[1],
            buf
        );
    }
}

fn render_header(model: &str, area: Rect, buf: &mut Buffer) {
    let title = if model.is_empty() {
        "Evaluating Segmentation Model".to_string()
    } else {
        format!("Evaluating {model}")
    };
    Paragraph::new(title).bold().alignment(Alignment::Left).fg(CUSTOM_LABEL_COLOR).render(area, buf);
}

fn render_footer(area: Rect, buf: &mut Buffer) {
    Paragraph::new("q / ESC to quit, ↑ ↓ to scroll history")
        .alignment(Alignment::Center)
        .fg(CUSTOM_LABEL_COLOR)
        .render(area, buf);
}

/// Fraction of batches processed, in `[0, 1]`.
pub fn batch_ratio(progress: &Progress) -> f64 {
    if progress.finished {
        return 1.0;
    }
    match progress.max_batch {
        Some(max) if max > 0 => ((progress.current_batch as f64) / (max as f64)).min(1.0),
        _ => 0.0,
    }
}

fn render_progress(progress: &Progress, area: Rect, buf: &mut Buffer) {
    let label = match progress.max_batch {
        _ if progress.failed.is_some() => format!("failed after {} batches", progress.current_batch),
        _ if progress.finished => format!("done, {} samples", progress.samples),
        Some(max) => format!("{}/{} batches", progress.current_batch, max),
        None => format!("{} batches", progress.current_batch),
    };
    let color = if progress.failed.is_some() { Color::Red } else { Color::Green };

    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Batch Progress"))
        .gauge_style(Style::default().fg(color))
        .ratio(batch_ratio(progress))
        .label(label)
        .render(area, buf);
}

fn render_table_metrics(state_nn: &EvalState, area: Rect, buf: &mut Buffer) {
    let metrics = &state_nn.metrics;
    let values = [
        ("Binary Cross Entropy", format!("{:.5}", metrics.bce)),
        ("Dice-Coefficient", format!("{:.5}", metrics.dice)),
        ("Intersection over Union", format!("{:.5}", metrics.iou)),
        ("Pixel-Wise Accuracy", format!("{:.4}%", metrics.accuracy * 100.0)),
        ("Samples", state_nn.progress.samples.to_string()),
    ];

    let rows = values.into_iter().map(|(name, value)| {
        Row::new(vec![Cell::from(name), Cell::from(value)]).height(1)
    });

    Table::new(rows, [Constraint::Length(25), Constraint::Min(1)])
        .block(title_block("Metrics"))
        .render(area, buf);
}

impl App {
    fn render_table_history(&self, state_nn: &EvalState, area: Rect, buf: &mut Buffer) {
        let header_style = Style::default();
        let title = title_block("History");

        let rows = state_nn.log
            .iter()
            .rev()
            .skip(self.scroll_position)
            .map(|(info, value)| {
                Row::new(vec![Cell::from(info.as_str()), Cell::from(value.as_str())]).height(1)
            });

        let header = Row::new(vec![Cell::from("Info"), Cell::from("Accuracy")])
            .style(header_style)
            .height(1);

        Table::new(rows, [Constraint::Percentage(60), Constraint::Percentage(40)])
            .header(header)
            .block(title)
            .render(area, buf);
    }
}

fn render_metric_graph(state_nn: &EvalState, area: Rect, buf: &mut Buffer) {
    let history = &state_nn.history;
    let series = [
        ("Accuracy", Color::Green, &history.accuracy),
        ("Dice", Color::Cyan, &history.dice),
        ("IoU", Color::Magenta, &history.iou),
        ("BCE", Color::Yellow, &history.loss),
    ];

    let datasets = series
        .iter()
        .map(|(name, color, points)| {
            Dataset::default()
                .name(*name)
                .marker(symbols::Marker::Braille)
                .style(Style::default().fg(*color))
                .graph_type(GraphType::Line)
                .data(points)
        })
        .collect::<Vec<_>>();

    let max_x = (history.len() as f64).max(1.0);
    let max_y = history.loss
        .iter()
        .map(|(_, y)| *y)
        .fold(1.0_f64, f64::max);

    Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("Running Metrics"))
        .x_axis(
            Axis::default()
                .title("Batches")
                .bounds([0.0, max_x])
                .style(Style::default().fg(Color::Gray))
        )
        .y_axis(
            Axis::default()
                .title("Value")
                .bounds([0.0, max_y])
                .style(Style::default().fg(Color::Gray))
        )
        .render(area, buf);
}

fn rgb((r, g, b): (u8, u8, u8)) -> Color {
    Color::Rgb(r, g, b)
}

fn render_heatmap(heatmap: Option<&Heatmap>, failed: Option<&str>, area: Rect, buf: &mut Buffer) {
    let title = heatmap
        .and_then(|h| h.title.as_deref())
        .unwrap_or("Confusion Matrix");
    let block = title_block(title);

    let Some(heatmap) = heatmap else {
        let message = match failed {
            Some(err) => Text::from(format!("evaluation failed: {err}\npress q to quit")).red(),
            None => Text::from("waiting for the evaluation to finish"),
        };
        Paragraph::new(message)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block)
            .render(area, buf);
        return;
    };

    let axes = [heatmap.y_label.as_str(), heatmap.x_label.as_str()]
        .iter()
        .map(|label| label.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|label| !label.is_empty())
        .collect::<Vec<_>>()
        .join(" / ");
    let block = if axes.is_empty() { block } else { block.title_bottom(axes) };

    let label_width = heatmap.categories
        .iter()
        .map(|c| c.chars().count())
        .max()
        .unwrap_or(0) as u16;

    let rows = heatmap.cells
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let height = row
                .iter()
                .map(|cell| cell.text.lines().count().max(1))
                .max()
                .unwrap_or(1) as u16;
            let label = heatmap.categories.get(i).cloned().unwrap_or_default();
            let cells = iter::once(Cell::from(label)).chain(
                row.iter().map(|cell| {
                    Cell::from(Text::from(cell.text.clone()).alignment(Alignment::Center)).style(
                        Style::default().bg(rgb(cell.fill)).fg(rgb(cell.ink))
                    )
                })
            );
            Row::new(cells).height(height)
        });

    let widths = iter::once(Constraint::Length(label_width)).chain(
        iter::repeat(Constraint::Fill(1)).take(heatmap.cells.len())
    );

    let mut table = Table::new(rows, widths).block(block).column_spacing(0);
    if !heatmap.categories.is_empty() {
        let header = Row::new(
            iter::once(Cell::from("")).chain(
                heatmap.categories
                    .iter()
                    .map(|c| Cell::from(Text::from(c.clone()).alignment(Alignment::Center)))
            )
        );
        table = table.header(header);
    }
    table.render(area, buf);
}

fn title_block(title: &str) -> Block<'_> {
    let title = Title::from(title).alignment(Alignment::Center);
    Block::new()
        .padding(Padding::vertical(1))
        .title(title)
        .borders(Borders::ALL)
        .fg(CUSTOM_LABEL_COLOR)
}
