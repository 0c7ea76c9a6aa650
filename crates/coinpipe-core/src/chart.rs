use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use crate::SeriesPoint;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("nothing to chart for '{label}'")]
    EmptySeries { label: String },
    #[error("failed to write chart: {0}")]
    Io(#[from] std::io::Error),
}

/// Consumer of an ordered price series. Returns the written artifact.
pub trait ChartSink: Send + Sync {
    fn render(&self, label: &str, series: &[SeriesPoint]) -> Result<PathBuf, ChartError>;
}

/// Writes a single-line SVG chart per series.
#[derive(Debug, Clone)]
pub struct SvgChartSink {
    output_dir: PathBuf,
}

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 480.0;
const MARGIN: f64 = 48.0;

impl SvgChartSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn document(label: &str, series: &[SeriesPoint]) -> String {
        let plot_w = WIDTH - 2.0 * MARGIN;
        let plot_h = HEIGHT - 2.0 * MARGIN;

        let (min_p, max_p) = series
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), point| {
                (lo.min(point.price), hi.max(point.price))
            });
        let first_ms = series.first().map_or(0, |point| point.timestamp.unix_millis());
        let last_ms = series.last().map_or(0, |point| point.timestamp.unix_millis());
        let span_ms = (last_ms - first_ms).max(1) as f64;
        let span_p = if max_p > min_p { max_p - min_p } else { 1.0 };

        let vertices: Vec<String> = series
            .iter()
            .map(|point| {
                let x =
                    MARGIN + (point.timestamp.unix_millis() - first_ms) as f64 / span_ms * plot_w;
                let y = MARGIN + plot_h - (point.price - min_p) / span_p * plot_h;
                format!("{x:.1},{y:.1}")
            })
            .collect();

        let title = escape(label);
        let mut lines = vec![
            format!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
            ),
            String::from(r#"<rect width="100%" height="100%" fill="white"/>"#),
            format!(
                r#"<text x="{MARGIN}" y="28" font-family="sans-serif" font-size="16">{title}</text>"#
            ),
            format!(
                r##"<rect x="{MARGIN}" y="{MARGIN}" width="{plot_w}" height="{plot_h}" fill="none" stroke="#ccc"/>"##
            ),
            format!(
                r#"<text x="4" y="{top:.1}" font-family="sans-serif" font-size="11">{max_p:.2}</text>"#,
                top = MARGIN + 4.0
            ),
            format!(
                r#"<text x="4" y="{bottom:.1}" font-family="sans-serif" font-size="11">{min_p:.2}</text>"#,
                bottom = MARGIN + plot_h
            ),
        ];
        if let (Some(first), Some(last)) = (series.first(), series.last()) {
            lines.push(format!(
                r#"<text x="{MARGIN}" y="{y:.1}" font-family="sans-serif" font-size="11">{}</text>"#,
                first.timestamp,
                y = HEIGHT - 16.0
            ));
            lines.push(format!(
                r#"<text x="{x:.1}" y="{y:.1}" font-family="sans-serif" font-size="11" text-anchor="end">{}</text>"#,
                last.timestamp,
                x = WIDTH - MARGIN,
                y = HEIGHT - 16.0
            ));
        }
        lines.push(format!(
            r##"<polyline fill="none" stroke="#1f77b4" stroke-width="2" points="{}"/>"##,
            vertices.join(" ")
        ));
        lines.push(String::from("</svg>"));

        let mut svg = lines.join("\n");
        svg.push('\n');
        svg
    }
}

impl ChartSink for SvgChartSink {
    fn render(&self, label: &str, series: &[SeriesPoint]) -> Result<PathBuf, ChartError> {
        if series.is_empty() {
            return Err(ChartError::EmptySeries {
                label: label.to_owned(),
            });
        }
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.svg", file_stem(label)));
        fs::write(&path, Self::document(label, series))?;
        Ok(path)
    }
}

fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UtcDateTime;

    fn series(prices: &[f64]) -> Vec<SeriesPoint> {
        prices
            .iter()
            .enumerate()
            .map(|(index, price)| SeriesPoint {
                timestamp: UtcDateTime::from_unix_millis(1_704_067_200_000 + index as i64 * 60_000)
                    .expect("ts"),
                price: *price,
            })
            .collect()
    }

    #[test]
    fn writes_svg_with_one_vertex_per_point() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = SvgChartSink::new(dir.path().join("charts"));

        let path = sink
            .render("bitcoin usd/30d", &series(&[1.0, 3.0, 2.0]))
            .expect("render");

        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("bitcoin_usd_30d.svg")
        );
        let body = fs::read_to_string(&path).expect("read chart");
        assert!(body.starts_with("<svg"));
        let polyline = body
            .lines()
            .find(|line| line.starts_with("<polyline"))
            .expect("polyline");
        assert_eq!(polyline.matches(',').count(), 3);
    }

    #[test]
    fn document_labels_bounds_and_escapes_title() {
        let body = SvgChartSink::document("<btc> & co", &series(&[10.0, 12.5]));

        assert!(body.contains("&lt;btc&gt; &amp; co"));
        assert!(body.contains(">12.50</text>"));
        assert!(body.contains(">10.00</text>"));
        assert!(body.contains("2024-01-01T00:00:00Z"));
        assert!(body.contains("2024-01-01T00:01:00Z"));
        assert!(body.ends_with("</svg>\n"));
    }

    #[test]
    fn flat_series_still_renders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = SvgChartSink::new(dir.path());
        assert!(sink.render("flat", &series(&[5.0, 5.0])).is_ok());
    }

    #[test]
    fn empty_series_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SvgChartSink::new(dir.path())
            .render("empty", &[])
            .expect_err("empty");
        assert!(matches!(err, ChartError::EmptySeries { .. }));
    }
}
