//! The performance panel under the transcript.

use std::time::Duration;

use iced::{
    widget::{column, container, progress_bar, row, text},
    Element, Length,
};

use crate::metrics::{MetricsLog, HISTORY_LEN};

pub fn view<'a, M: 'a>(log: &'a MetricsLog) -> Element<'a, M> {
    if log.is_empty() {
        return text("No completed replies to measure yet.").into();
    }

    let average = log.average_response_time();
    let tiles = row![
        tile(
            "Average Response Time",
            average.map(format_seconds),
            log.response_time_delta().map(|d| format_delta(d, 1, "s")),
        ),
        tile(
            "Tokens/Second",
            log.latest_tokens_per_second().map(|r| format!("{:.0}", r)),
            log.tokens_per_second_delta().map(|d| format_delta(d, 0, "")),
        ),
        tile("Replies Measured", Some(log.len().to_string()), None),
    ]
    .spacing(20);

    let slowest = log
        .models()
        .iter()
        .flat_map(|model| log.history(model))
        .fold(0.0_f64, f64::max)
        .max(f64::EPSILON);

    let history = column(log.models().into_iter().map(|model| {
        let bars = column(log.history(model).into_iter().map(|seconds| {
            row![
                progress_bar(0.0..=slowest as f32, seconds as f32),
                text(format!("{:.1}s", seconds)).width(Length::Fixed(60.0)),
            ]
            .spacing(10)
            .into()
        }))
        .spacing(4);
        column![text(model.to_string()).size(14), bars]
            .spacing(4)
            .into()
    }))
    .spacing(10);

    container(
        column![
            text("Model Performance Metrics").size(20),
            tiles,
            text(format!(
                "Response time history (last {} replies)",
                HISTORY_LEN
            )),
            history,
        ]
        .spacing(10),
    )
    .padding(10)
    .width(Length::Fill)
    .style(container::rounded_box)
    .into()
}

fn tile<'a, M: 'a>(label: &'a str, value: Option<String>, delta: Option<String>) -> Element<'a, M> {
    column![
        text(label).size(14),
        text(value.unwrap_or_else(|| "n/a".to_string())).size(24),
        text(delta.unwrap_or_default()).size(12),
    ]
    .width(Length::FillPortion(1))
    .into()
}

fn format_seconds(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

fn format_delta(delta: f64, precision: usize, unit: &str) -> String {
    let sign = if delta < 0.0 { '-' } else { '+' };
    format!("{}{:.*}{}", sign, precision, delta.abs(), unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::from_millis(1200)), "1.2s");
        assert_eq!(format_seconds(Duration::from_secs(0)), "0.0s");
    }

    #[test]
    fn test_format_delta() {
        assert_eq!(format_delta(-0.3, 1, "s"), "-0.3s");
        assert_eq!(format_delta(5.0, 0, ""), "+5");
        assert_eq!(format_delta(0.0, 1, "s"), "+0.0s");
    }
}
