use serde::Serialize;

use super::{serialize_value, Labels};
use crate::frame::Frame;

/// Reserved label carrying the metric (frame) name.
pub const NAME_LABEL: &str = "__name__";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantSample {
    pub labels: Labels,
    pub timestamp: i64,
    #[serde(serialize_with = "serialize_value")]
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplePoint {
    pub timestamp: i64,
    #[serde(serialize_with = "serialize_value")]
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    pub labels: Labels,
    pub samples: Vec<SamplePoint>,
}

impl MetricSeries {
    pub fn is_all_nan(&self) -> bool {
        self.samples.iter().all(|s| s.value.is_nan())
    }
}

/// Value-field labels plus the frame's display name under `__name__`.
pub fn series_labels(frame: &Frame) -> Labels {
    let mut labels = frame.value_labels();
    if let Some(name) = frame.display_name() {
        labels.insert(NAME_LABEL.to_string(), name.to_string());
    }
    labels
}

pub(crate) fn instant_vector(frames: &[Frame]) -> Vec<InstantSample> {
    frames
        .iter()
        .filter_map(|frame| {
            let (timestamp, value) = frame.time_value_pairs().last().copied()?;
            Some(InstantSample {
                labels: series_labels(frame),
                timestamp,
                value,
            })
        })
        .collect()
}

pub(crate) fn range_matrix(frames: &[Frame]) -> Vec<MetricSeries> {
    frames
        .iter()
        .filter_map(|frame| {
            let samples: Vec<SamplePoint> = frame
                .time_value_pairs()
                .into_iter()
                .map(|(timestamp, value)| SamplePoint { timestamp, value })
                .collect();
            if samples.is_empty() {
                return None;
            }
            Some(MetricSeries {
                labels: series_labels(frame),
                samples,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{field, series_frame};
    use crate::frame::{Column, FieldRole, REF_ID};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instant_takes_last_pair() {
        let frames = vec![series_frame("up", &[1000, 2000], &[Some(1.0), Some(2.0)])];
        let samples = instant_vector(&frames);
        assert_eq!(samples.len(), 1);
        assert_eq!((samples[0].timestamp, samples[0].value), (2000, 2.0));
        assert_eq!(samples[0].labels.get(NAME_LABEL).map(String::as_str), Some("up"));
    }

    #[test]
    fn test_range_keeps_full_ordered_sequence() {
        let frames = vec![
            series_frame("a", &[1, 2, 3], &[Some(1.0), Some(2.0), Some(3.0)]),
            series_frame("b", &[], &[]),
        ];
        let matrix = range_matrix(&frames);
        assert_eq!(matrix.len(), 1);
        let points: Vec<(i64, f64)> = matrix[0].samples.iter().map(|p| (p.timestamp, p.value)).collect();
        assert_eq!(points, vec![(1, 1.0), (2, 2.0), (3, 3.0)]);
    }

    #[test]
    fn test_labels_merge_field_labels_and_name() {
        let mut value = field("Value", FieldRole::Number);
        value.labels.insert("job".to_string(), "api".to_string());
        let frame = Frame::new(
            String::new(),
            REF_ID.to_string(),
            vec![field("Time", FieldRole::Time), value],
            vec![Column::Time(vec![Some(1)]), Column::Number(vec![Some(1.0)])],
        );
        let labels = series_labels(&frame);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("job").map(String::as_str), Some("api"));
    }

    #[test]
    fn test_frames_without_series_columns_are_skipped() {
        let frame = Frame::new(
            "x".to_string(),
            REF_ID.to_string(),
            vec![field("Line", FieldRole::String)],
            vec![Column::Text(vec![Some("hello".to_string())])],
        );
        assert!(instant_vector(&[frame.clone()]).is_empty());
        assert!(range_matrix(&[frame]).is_empty());
    }
}
