//! Annotated confusion-matrix heatmaps.
//!
//! [`draw_confusion_matrix`] lays the figure out once (cell text, colours, axis
//! labels, summary statistics) into a [`Figure`], which can then be written as
//! SVG or handed to the terminal dashboard.

use std::path::Path;

use plotters::{
    coord::Shift,
    prelude::*,
    style::{ text_anchor::{ HPos, Pos, VPos }, FontTransform },
};
use serde::{ Deserialize, Serialize };

use crate::{
    error::{ EvalError, Result },
    utils::{ colormap::{ ink_for, Colormap, Rgb }, confusion::ConfusionMatrix },
};

const DPI: f64 = 100.0;
const DEFAULT_FIGSIZE: (f64, f64) = (6.4, 4.8);
const FONT: &str = "sans-serif";
const CBAR_STEPS: i32 = 64;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Categories {
    /// Class indices `0..n`.
    #[default]
    Auto,
    Labels(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapOptions {
    /// One label per cell, row by row. Ignored unless there is exactly one per cell.
    pub group_names: Option<Vec<String>>,
    pub categories: Categories,
    pub count: bool,
    pub percent: bool,
    pub cbar: bool,
    pub xyticks: bool,
    pub xyplotlabels: bool,
    pub sum_stats: bool,
    pub omit_diagonal: bool,
    /// Width and height in inches.
    pub figsize: Option<(f64, f64)>,
    pub cmap: Colormap,
    pub title: Option<String>,
}

impl Default for HeatmapOptions {
    fn default() -> Self {
        Self {
            group_names: None,
            categories: Categories::Auto,
            count: true,
            percent: true,
            cbar: true,
            xyticks: true,
            xyplotlabels: true,
            sum_stats: true,
            omit_diagonal: false,
            figsize: None,
            cmap: Colormap::Blues,
            title: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    /// Values actually coloured, with the diagonal zeroed when it is omitted.
    pub values: Vec<Vec<u64>>,
    pub annotations: Vec<Vec<String>>,
    pub fills: Vec<Vec<Rgb>>,
    pub tick_labels: Option<Vec<String>>,
    pub x_label: String,
    pub y_label: String,
    pub title: Option<String>,
    /// Colour scale bounds, present when the colour bar is drawn.
    pub cbar: Option<(u64, u64)>,
    pub cmap: Colormap,
    /// Pixels.
    pub size: (u32, u32),
}

/// Text appended below the x axis: accuracy, plus precision/recall/F1 for two classes.
pub fn summary_stats_text(cf: &ConfusionMatrix) -> String {
    let accuracy = cf.accuracy();
    match cf.binary_stats() {
        Some(stats) =>
            format!(
                "\n\nAccuracy={:.3}\nPrecision={:.3}\nRecall={:.3}\nF1 Score={:.3}",
                accuracy,
                stats.precision,
                stats.recall,
                stats.f1
            ),
        None => format!("\n\nAccuracy={accuracy:.3}"),
    }
}

fn box_labels(cf: &ConfusionMatrix, options: &HeatmapOptions) -> Vec<Vec<String>> {
    let n = cf.n_classes();
    let total = cf.total() as f64;
    let group_names = options.group_names.as_ref().filter(|names| names.len() == n * n);

    (0..n)
        .map(|row| {
            (0..n)
                .map(|col| {
                    if options.omit_diagonal && row == col {
                        return String::new();
                    }
                    let value = cf.get(row, col);
                    let group = group_names
                        .map(|names| format!("{}\n", names[row * n + col]))
                        .unwrap_or_default();
                    let count = if options.count { format!("{value}\n") } else { String::new() };
                    let percent = match options.percent {
                        true if total > 0.0 => format!("{:.2}%", ((value as f64) / total) * 100.0),
                        true => format!("{:.2}%", 0.0),
                        false => String::new(),
                    };
                    format!("{group}{count}{percent}").trim().to_string()
                })
                .collect()
        })
        .collect()
}

fn tick_labels(n: usize, options: &HeatmapOptions) -> Result<Option<Vec<String>>> {
    if !options.xyticks {
        return Ok(None);
    }
    match &options.categories {
        Categories::Auto => Ok(Some((0..n).map(|i| i.to_string()).collect())),
        Categories::Labels(labels) if labels.len() == n => Ok(Some(labels.clone())),
        Categories::Labels(labels) =>
            Err(
                EvalError::Config(
                    format!("{} categories given for a {n}x{n} confusion matrix", labels.len())
                )
            ),
    }
}

/// Lays out the heatmap of `cf`. Summary statistics are computed before the diagonal is removed.
pub fn draw_confusion_matrix(cf: &ConfusionMatrix, options: &HeatmapOptions) -> Result<Figure> {
    let stats_text = if !options.omit_diagonal && options.sum_stats {
        summary_stats_text(cf)
    } else {
        String::new()
    };

    let shown = if options.omit_diagonal { cf.without_diagonal() } else { cf.clone() };
    let annotations = box_labels(&shown, options);
    let tick_labels = tick_labels(shown.n_classes(), options)?;

    let flat = shown.rows().iter().flatten().copied();
    let vmin = flat.clone().min().unwrap_or(0);
    let vmax = flat.max().unwrap_or(0);
    let span = (vmax - vmin) as f64;
    let fills = shown
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|&v| {
                    let t = if span > 0.0 { ((v - vmin) as f64) / span } else { 0.0 };
                    options.cmap.sample(t)
                })
                .collect()
        })
        .collect();

    let (x_label, y_label) = if options.xyplotlabels {
        (format!("Predicted label{stats_text}"), "True label".to_string())
    } else {
        (stats_text, String::new())
    };

    let (w, h) = options.figsize.unwrap_or(DEFAULT_FIGSIZE);
    let size = (((w * DPI).round() as u32).max(1), ((h * DPI).round() as u32).max(1));

    tracing::debug!(classes = shown.n_classes(), ?size, "laid out confusion matrix");

    Ok(Figure {
        values: shown.rows().to_vec(),
        annotations,
        fills,
        tick_labels,
        x_label,
        y_label,
        title: options.title.clone(),
        cbar: options.cbar.then_some((vmin, vmax)),
        cmap: options.cmap,
        size,
    })
}

fn plot_err<E: std::fmt::Display>(err: E) -> EvalError {
    EvalError::Plot(err.to_string())
}

fn rgb((r, g, b): Rgb) -> RGBColor {
    RGBColor(r, g, b)
}

impl Figure {
    pub fn n_classes(&self) -> usize {
        self.values.len()
    }

    pub fn save_svg<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let root = SVGBackend::new(path.as_ref(), self.size).into_drawing_area();
        self.draw(&root)?;
        root.present().map_err(plot_err)?;
        tracing::info!(path = %path.as_ref().display(), "saved confusion matrix heatmap");
        Ok(())
    }

    pub fn to_svg_string(&self) -> Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, self.size).into_drawing_area();
            self.draw(&root)?;
            root.present().map_err(plot_err)?;
        }
        Ok(svg)
    }

    /// Terminal rendition of the same cells.
    pub fn to_heatmap(&self) -> ui::state::Heatmap {
        let cells = self.annotations
            .iter()
            .zip(self.fills.iter())
            .map(|(texts, fills)| {
                texts
                    .iter()
                    .zip(fills.iter())
                    .map(|(text, &fill)| ui::state::HeatCell {
                        text: text.clone(),
                        fill,
                        ink: ink_for(fill),
                    })
                    .collect()
            })
            .collect();

        ui::state::Heatmap {
            title: self.title.clone(),
            categories: self.tick_labels.clone().unwrap_or_default(),
            cells,
            x_label: self.x_label.clone(),
            y_label: self.y_label.clone(),
        }
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        root.fill(&WHITE).map_err(plot_err)?;

        let (width, height) = (self.size.0 as i32, self.size.1 as i32);
        let n = self.n_classes().max(1) as i32;
        let x_lines: Vec<&str> = self.x_label.lines().collect();
        let tick_width = self.tick_labels
            .as_ref()
            .map(|labels| {
                labels
                    .iter()
                    .map(|l| l.chars().count())
                    .max()
                    .unwrap_or(0) as i32
            })
            .map(|chars| chars * 7 + 8)
            .unwrap_or(0);

        let top = 10 + (if self.title.is_some() { 26 } else { 0 });
        let left = 10 + (if self.y_label.is_empty() { 0 } else { 22 }) + tick_width;
        let right = 10 + (if self.cbar.is_some() { 80 } else { 0 });
        let bottom =
            10 + (if self.tick_labels.is_some() { 20 } else { 0 }) + (x_lines.len() as i32) * 17;

        let grid_w = (width - left - right).max(n);
        let grid_h = (height - top - bottom).max(n);
        let cell_w = grid_w / n;
        let cell_h = grid_h / n;

        let centered = Pos::new(HPos::Center, VPos::Center);

        if let Some(title) = &self.title {
            let style = (FONT, 16).into_font().color(&BLACK).pos(centered);
            root.draw(&Text::new(title.clone(), (left + grid_w / 2, 18), style)).map_err(plot_err)?;
        }

        for (row, (texts, fills)) in self.annotations.iter().zip(self.fills.iter()).enumerate() {
            for (col, (text, &fill)) in texts.iter().zip(fills.iter()).enumerate() {
                let x0 = left + (col as i32) * cell_w;
                let y0 = top + (row as i32) * cell_h;
                root
                    .draw(&Rectangle::new([(x0, y0), (x0 + cell_w, y0 + cell_h)], rgb(fill).filled()))
                    .map_err(plot_err)?;

                let lines: Vec<&str> = text.lines().collect();
                let ink = rgb(ink_for(fill));
                let first = y0 + cell_h / 2 - ((lines.len() as i32) - 1) * 7;
                for (i, line) in lines.iter().enumerate() {
                    let style = (FONT, 12).into_font().color(&ink).pos(centered);
                    let at = (x0 + cell_w / 2, first + (i as i32) * 14);
                    root.draw(&Text::new(line.to_string(), at, style)).map_err(plot_err)?;
                }
            }
        }

        if let Some(labels) = &self.tick_labels {
            for (i, label) in labels.iter().enumerate() {
                let offset = (i as i32) * cell_w + cell_w / 2;
                let style = (FONT, 12).into_font().color(&BLACK).pos(Pos::new(HPos::Center, VPos::Top));
                root
                    .draw(&Text::new(label.clone(), (left + offset, top + grid_h + 4), style))
                    .map_err(plot_err)?;

                let offset = (i as i32) * cell_h + cell_h / 2;
                let style = (FONT, 12).into_font().color(&BLACK).pos(Pos::new(HPos::Right, VPos::Center));
                root.draw(&Text::new(label.clone(), (left - 4, top + offset), style)).map_err(plot_err)?;
            }
        }

        let x_top = top + grid_h + (if self.tick_labels.is_some() { 20 } else { 0 }) + 4;
        for (i, line) in x_lines.iter().enumerate() {
            let style = (FONT, 14).into_font().color(&BLACK).pos(Pos::new(HPos::Center, VPos::Top));
            root
                .draw(&Text::new(line.to_string(), (left + grid_w / 2, x_top + (i as i32) * 17), style))
                .map_err(plot_err)?;
        }

        if !self.y_label.is_empty() {
            let style = (FONT, 14)
                .into_font()
                .transform(FontTransform::Rotate270)
                .color(&BLACK)
                .pos(centered);
            root.draw(&Text::new(self.y_label.clone(), (16, top + grid_h / 2), style)).map_err(plot_err)?;
        }

        if let Some((vmin, vmax)) = self.cbar {
            self.draw_cbar(root, (left + grid_w + 20, top), grid_h, (vmin, vmax))?;
        }

        Ok(())
    }

    fn draw_cbar<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
        (x, y): (i32, i32),
        height: i32,
        (vmin, vmax): (u64, u64)
    ) -> Result<()> {
        let bar_width = 20;
        for step in 0..CBAR_STEPS {
            let y0 = y + (height * step) / CBAR_STEPS;
            let y1 = y + (height * (step + 1)) / CBAR_STEPS;
            let t = 1.0 - (step as f64) / ((CBAR_STEPS - 1) as f64);
            let fill = rgb(self.cmap.sample(t)).filled();
            root.draw(&Rectangle::new([(x, y0), (x + bar_width, y1)], fill)).map_err(plot_err)?;
        }

        let ticks = [(vmax, y), ((vmin + vmax) / 2, y + height / 2), (vmin, y + height)];
        for (value, at) in ticks {
            let style = (FONT, 12).into_font().color(&BLACK).pos(Pos::new(HPos::Left, VPos::Center));
            root.draw(&Text::new(value.to_string(), (x + bar_width + 4, at), style)).map_err(plot_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary() -> ConfusionMatrix {
        ConfusionMatrix::from_rows(vec![vec![50, 10], vec![5, 35]]).unwrap()
    }

    #[test]
    fn annotates_counts_and_percentages() {
        let figure = draw_confusion_matrix(&binary(), &HeatmapOptions::default()).unwrap();
        assert_eq!(figure.annotations[0][0], "50\n50.00%");
        assert_eq!(figure.annotations[1][0], "5\n5.00%");
    }

    #[test]
    fn group_names_need_one_per_cell() {
        let names = vec!["TN", "FP", "FN", "TP"].into_iter().map(String::from).collect::<Vec<_>>();
        let options = HeatmapOptions {
            group_names: Some(names),
            percent: false,
            ..HeatmapOptions::default()
        };
        let figure = draw_confusion_matrix(&binary(), &options).unwrap();
        assert_eq!(figure.annotations[1][1], "TP\n35");

        let options = HeatmapOptions {
            group_names: Some(vec!["only".to_string()]),
            percent: false,
            ..HeatmapOptions::default()
        };
        let figure = draw_confusion_matrix(&binary(), &options).unwrap();
        assert_eq!(figure.annotations[1][1], "35");
    }

    #[test]
    fn binary_matrix_gets_full_summary() {
        let figure = draw_confusion_matrix(&binary(), &HeatmapOptions::default()).unwrap();
        assert_eq!(
            figure.x_label,
            "Predicted label\n\nAccuracy=0.850\nPrecision=0.778\nRecall=0.875\nF1 Score=0.824"
        );
        assert_eq!(figure.y_label, "True label");
    }

    #[test]
    fn multiclass_summary_is_accuracy_only() {
        let cf = ConfusionMatrix::from_rows(vec![vec![2, 0, 0], vec![0, 1, 1], vec![0, 0, 4]]).unwrap();
        let options = HeatmapOptions { xyplotlabels: false, ..HeatmapOptions::default() };
        let figure = draw_confusion_matrix(&cf, &options).unwrap();
        assert_eq!(figure.x_label, "\n\nAccuracy=0.875");
        assert!(figure.y_label.is_empty());
    }

    #[test]
    fn omitting_diagonal_blanks_it_and_drops_stats() {
        let options = HeatmapOptions { omit_diagonal: true, ..HeatmapOptions::default() };
        let figure = draw_confusion_matrix(&binary(), &options).unwrap();

        assert_eq!(figure.annotations[0][0], "");
        assert_eq!(figure.annotations[1][1], "");
        // percentages are taken over the off-diagonal total
        assert_eq!(figure.annotations[0][1], "10\n66.67%");
        assert_eq!(figure.values, vec![vec![0, 10], vec![5, 0]]);
        assert_eq!(figure.x_label, "Predicted label");
    }

    #[test]
    fn colours_span_the_colormap() {
        let figure = draw_confusion_matrix(&binary(), &HeatmapOptions::default()).unwrap();
        assert_eq!(figure.fills[0][0], Colormap::Blues.sample(1.0));
        assert_eq!(figure.fills[1][0], Colormap::Blues.sample(0.0));
        assert_eq!(figure.cbar, Some((5, 50)));
    }

    #[test]
    fn empty_matrix_still_renders() {
        let figure = draw_confusion_matrix(&ConfusionMatrix::new(2), &HeatmapOptions::default()).unwrap();
        assert_eq!(figure.annotations[0][1], "0\n0.00%");
        assert!(figure.to_svg_string().is_ok());
    }

    #[test]
    fn ticks_follow_categories() {
        let options = HeatmapOptions {
            categories: Categories::Labels(vec!["bg".into(), "lesion".into()]),
            ..HeatmapOptions::default()
        };
        let figure = draw_confusion_matrix(&binary(), &options).unwrap();
        assert_eq!(figure.tick_labels, Some(vec!["bg".to_string(), "lesion".to_string()]));

        let hidden = HeatmapOptions { xyticks: false, ..options };
        assert_eq!(draw_confusion_matrix(&binary(), &hidden).unwrap().tick_labels, None);

        let wrong = HeatmapOptions {
            categories: Categories::Labels(vec!["a".into()]),
            ..HeatmapOptions::default()
        };
        assert!(matches!(draw_confusion_matrix(&binary(), &wrong), Err(EvalError::Config(_))));
    }

    #[test]
    fn figsize_is_in_inches() {
        let options = HeatmapOptions { figsize: Some((8.0, 6.0)), ..HeatmapOptions::default() };
        assert_eq!(draw_confusion_matrix(&binary(), &options).unwrap().size, (800, 600));
        assert_eq!(draw_confusion_matrix(&binary(), &HeatmapOptions::default()).unwrap().size, (640, 480));
    }

    #[test]
    fn svg_contains_text() {
        let options = HeatmapOptions { title: Some("Heart".to_string()), ..HeatmapOptions::default() };
        let svg = draw_confusion_matrix(&binary(), &options).unwrap().to_svg_string().unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Heart"));
        assert!(svg.contains("True label"));
        assert!(svg.contains("Accuracy=0.850"));
        assert!(svg.contains("50.00%"));
    }

    #[test]
    fn terminal_heatmap_mirrors_figure() {
        let figure = draw_confusion_matrix(&binary(), &HeatmapOptions::default()).unwrap();
        let heatmap = figure.to_heatmap();
        assert_eq!(heatmap.categories, vec!["0", "1"]);
        assert_eq!(heatmap.cells[0][0].text, figure.annotations[0][0]);
        assert_eq!(heatmap.cells[0][0].ink, (255, 255, 255));
        assert_eq!(heatmap.cells[1][0].ink, (0, 0, 0));
    }

    #[test]
    fn options_parse_from_toml() {
        let options: HeatmapOptions = toml::from_str(
            r#"
            cmap = "greens"
            percent = false
            categories = { labels = ["bg", "fg"] }
            "#
        ).unwrap();
        assert_eq!(options.cmap, Colormap::Greens);
        assert!(!options.percent);
        assert!(options.count);
        assert_eq!(options.categories, Categories::Labels(vec!["bg".into(), "fg".into()]));
    }
}
