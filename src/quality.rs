//! Quality score for a finished job.
//!
//! `score` is referentially transparent: identical metrics always give the
//! identical score, breakdown and suggestions.

use serde::{Deserialize, Serialize};

use crate::job::ErrorCode;

pub const MAX_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    #[default]
    Lite,
    Standard,
    Deep,
}

impl AnalysisDepth {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lite" => Some(AnalysisDepth::Lite),
            "standard" => Some(AnalysisDepth::Standard),
            "deep" => Some(AnalysisDepth::Deep),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisDepth::Lite => "lite",
            AnalysisDepth::Standard => "standard",
            AnalysisDepth::Deep => "deep",
        }
    }

    fn points(&self) -> u32 {
        match self {
            AnalysisDepth::Lite => 5,
            AnalysisDepth::Standard => 10,
            AnalysisDepth::Deep => 15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub targets_configured: u32,
    pub targets_covered: u32,
    pub files_read: u32,
    pub files_produced: u32,
    pub depth: AnalysisDepth,
    pub multi_pass: bool,
}

/// Scored dimensions, in suggestion priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Coverage,
    FilesAnalyzed,
    OutputVolume,
    Depth,
    MultiPass,
}

impl Dimension {
    fn cap(&self) -> u32 {
        match self {
            Dimension::Coverage => 30,
            Dimension::FilesAnalyzed => 20,
            Dimension::OutputVolume => 20,
            Dimension::Depth => 15,
            Dimension::MultiPass => 15,
        }
    }

    fn remediation(&self) -> &'static str {
        match self {
            Dimension::Coverage => "Cover every configured target, or narrow the target list",
            Dimension::FilesAnalyzed => "Point the agent at more source files so it can ground its output",
            Dimension::OutputVolume => "Split the output into more focused files",
            Dimension::Depth => "Run with a deeper analysis depth",
            Dimension::MultiPass => "Enable multi-pass review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub dimension: Option<Dimension>,
    pub points: u32,
    pub max: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: u32,
    pub breakdown: Vec<ScoreLine>,
    /// At most two actionable suggestions
    pub suggestions: Vec<String>,
}

pub fn score(metrics: &QualityMetrics) -> QualityReport {
    if metrics.failed {
        let code = metrics.error_code.unwrap_or(ErrorCode::Internal);
        return QualityReport {
            score: 0,
            breakdown: vec![ScoreLine {
                dimension: None,
                points: 0,
                max: MAX_SCORE,
                detail: format!("Job failed with {}", code),
            }],
            suggestions: vec![code.remediation().to_string()],
        };
    }

    let covered = metrics.targets_covered.min(metrics.targets_configured);
    let coverage = if metrics.targets_configured == 0 {
        0
    } else {
        // Rounded to nearest point.
        let configured = u64::from(metrics.targets_configured);
        ((30 * u64::from(covered) + configured / 2) / configured) as u32
    };

    let lines = vec![
        ScoreLine {
            dimension: Some(Dimension::Coverage),
            points: coverage,
            max: Dimension::Coverage.cap(),
            detail: format!(
                "Target coverage: {} of {} targets",
                covered, metrics.targets_configured
            ),
        },
        ScoreLine {
            dimension: Some(Dimension::FilesAnalyzed),
            points: metrics.files_read.saturating_mul(2).min(20),
            max: Dimension::FilesAnalyzed.cap(),
            detail: format!("Files analyzed: {}", metrics.files_read),
        },
        ScoreLine {
            dimension: Some(Dimension::OutputVolume),
            points: metrics.files_produced.saturating_mul(5).min(20),
            max: Dimension::OutputVolume.cap(),
            detail: format!("Files produced: {}", metrics.files_produced),
        },
        ScoreLine {
            dimension: Some(Dimension::Depth),
            points: metrics.depth.points(),
            max: Dimension::Depth.cap(),
            detail: format!("Analysis depth: {}", metrics.depth.as_str()),
        },
        ScoreLine {
            dimension: Some(Dimension::MultiPass),
            points: if metrics.multi_pass { 15 } else { 0 },
            max: Dimension::MultiPass.cap(),
            detail: if metrics.multi_pass {
                "Multi-pass review used".to_string()
            } else {
                "Single pass".to_string()
            },
        },
    ];

    let total = lines.iter().map(|l| l.points).sum::<u32>().min(MAX_SCORE);
    let suggestions = suggestions_for(&lines);

    QualityReport {
        score: total,
        breakdown: lines,
        suggestions,
    }
}

/// The two weakest dimensions below their cap, reported in priority order.
fn suggestions_for(lines: &[ScoreLine]) -> Vec<String> {
    let mut weak: Vec<(Dimension, u32, u32)> = lines
        .iter()
        .filter_map(|l| l.dimension.map(|d| (d, l.points, l.max)))
        .filter(|(_, points, max)| points < max)
        .collect();
    // Compare points/max as cross products to stay in integers.
    weak.sort_by(|(da, pa, ma), (db, pb, mb)| (pa * mb).cmp(&(pb * ma)).then(da.cmp(db)));
    weak.truncate(2);
    weak.sort_by_key(|(d, _, _)| *d);
    weak.into_iter()
        .map(|(d, _, _)| d.remediation().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(
        configured: u32,
        covered: u32,
        read: u32,
        produced: u32,
        depth: AnalysisDepth,
        multi_pass: bool,
    ) -> QualityMetrics {
        QualityMetrics {
            failed: false,
            error_code: None,
            targets_configured: configured,
            targets_covered: covered,
            files_read: read,
            files_produced: produced,
            depth,
            multi_pass,
        }
    }

    #[test]
    fn failed_job_scores_zero_regardless_of_metrics() {
        let mut metrics = completed(4, 4, 10, 4, AnalysisDepth::Deep, true);
        metrics.failed = true;
        metrics.error_code = Some(ErrorCode::ContractViolation);
        let report = score(&metrics);
        assert_eq!(report.score, 0);
        assert_eq!(report.breakdown.len(), 1);
        assert!(report.breakdown[0].detail.contains("CONTRACT_VIOLATION"));
        assert_eq!(
            report.suggestions,
            vec![ErrorCode::ContractViolation.remediation().to_string()]
        );
    }

    #[test]
    fn empty_lite_job_scores_depth_only() {
        let report = score(&completed(0, 0, 0, 0, AnalysisDepth::Lite, false));
        assert_eq!(report.score, 5);
    }

    #[test]
    fn full_example_scores_85() {
        let report = score(&completed(1, 1, 5, 3, AnalysisDepth::Deep, true));
        assert_eq!(report.score, 30 + 10 + 15 + 15 + 15);
        assert_eq!(report.score, 85);
    }

    #[test]
    fn total_is_capped_at_100() {
        let report = score(&completed(2, 2, 50, 50, AnalysisDepth::Deep, true));
        assert_eq!(report.score, 100);
    }

    #[test]
    fn score_is_monotonic_in_each_count() {
        let base = |covered, read, produced| {
            score(&completed(5, covered, read, produced, AnalysisDepth::Standard, false)).score
        };
        for n in 0..5 {
            assert!(base(n, 0, 0) <= base(n + 1, 0, 0));
        }
        for n in 0..15 {
            assert!(base(0, n, 0) <= base(0, n + 1, 0));
            assert!(base(0, 0, n) <= base(0, 0, n + 1));
        }
        assert_eq!(base(0, 10, 0), base(0, 11, 0));
        assert_eq!(base(0, 0, 4), base(0, 0, 5));
    }

    #[test]
    fn huge_target_counts_do_not_overflow() {
        let report = score(&completed(u32::MAX, u32::MAX, 0, 0, AnalysisDepth::Lite, false));
        assert_eq!(report.breakdown[0].points, 30);
        assert_eq!(report.breakdown[0].max, Dimension::Coverage.cap());
    }

    #[test]
    fn identical_input_identical_report() {
        let metrics = completed(3, 2, 4, 1, AnalysisDepth::Standard, false);
        assert_eq!(score(&metrics), score(&metrics));
    }

    #[test]
    fn suggestions_pick_two_weakest_in_priority_order() {
        // coverage 30/30, files 2/20, output 0/20, depth 10/15, multi-pass 0/15
        let report = score(&completed(1, 1, 1, 0, AnalysisDepth::Standard, false));
        assert_eq!(
            report.suggestions,
            vec![
                Dimension::OutputVolume.remediation().to_string(),
                Dimension::MultiPass.remediation().to_string(),
            ]
        );

        let perfect = score(&completed(1, 1, 10, 4, AnalysisDepth::Deep, true));
        assert!(perfect.suggestions.is_empty());
    }
}
