use serde::Serialize;

use crate::core::config::GradingSettings;
use crate::services::sections::{Section, SectionScore};

/// Upper bound of the composite mark.
pub(crate) const MAX_COMPOSITE_MARK: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SectionWeights {
    pub(crate) mcq: f64,
    pub(crate) true_false: f64,
    pub(crate) code: f64,
}

impl SectionWeights {
    pub(crate) fn budget(&self, section: Section) -> f64 {
        match section {
            Section::Mcq => self.mcq,
            Section::TrueFalse => self.true_false,
            Section::Code => self.code,
        }
    }
}

/// Inclusive lower bounds of the A, B and C grades.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GradeBands {
    pub(crate) a: f64,
    pub(crate) b: f64,
    pub(crate) c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GradingPolicy {
    pub(crate) weights: SectionWeights,
    pub(crate) bands: GradeBands,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            weights: SectionWeights { mcq: 3.0, true_false: 2.0, code: 5.0 },
            bands: GradeBands { a: 9.0, b: 7.0, c: 5.0 },
        }
    }
}

impl GradingPolicy {
    pub(crate) fn from_settings(settings: &GradingSettings) -> Self {
        Self {
            weights: SectionWeights {
                mcq: settings.mcq_weight,
                true_false: settings.tf_weight,
                code: settings.code_weight,
            },
            bands: GradeBands {
                a: settings.grade_a_min,
                b: settings.grade_b_min,
                c: settings.grade_c_min,
            },
        }
    }

    pub(crate) fn letter(&self, composite: f64) -> LetterGrade {
        if composite >= self.bands.a {
            LetterGrade::A
        } else if composite >= self.bands.b {
            LetterGrade::B
        } else if composite >= self.bands.c {
            LetterGrade::C
        } else {
            LetterGrade::F
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum LetterGrade {
    A,
    B,
    C,
    F,
}

impl LetterGrade {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::F => "F",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct WeightedSection {
    pub(crate) section: Section,
    pub(crate) raw: f64,
    pub(crate) total: f64,
    pub(crate) budget: f64,
    pub(crate) mark: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct GradeResult {
    pub(crate) sections: Vec<WeightedSection>,
    pub(crate) composite: f64,
    pub(crate) grade: LetterGrade,
}

impl GradeResult {
    /// Weighted mark of `section`, 0 when the section was not graded.
    pub(crate) fn mark(&self, section: Section) -> f64 {
        self.sections
            .iter()
            .find(|weighted| weighted.section == section)
            .map_or(0.0, |weighted| weighted.mark)
    }
}

/// Rescales `raw / total` onto `budget`. An empty section is worth 0.
pub(crate) fn weighted_mark(raw: f64, total: f64, budget: f64) -> f64 {
    if !(total > 0.0) || !raw.is_finite() {
        return 0.0;
    }
    let budget = budget.max(0.0);
    (raw.clamp(0.0, total) / total) * budget
}

pub(crate) fn aggregate(scores: &[SectionScore], policy: &GradingPolicy) -> GradeResult {
    let sections: Vec<WeightedSection> = scores
        .iter()
        .map(|score| {
            let budget = policy.weights.budget(score.section);
            WeightedSection {
                section: score.section,
                raw: score.raw,
                total: score.total,
                budget,
                mark: weighted_mark(score.raw, score.total, budget),
            }
        })
        .collect();

    let composite =
        sections.iter().map(|weighted| weighted.mark).sum::<f64>().min(MAX_COMPOSITE_MARK);

    GradeResult { grade: policy.letter(composite), sections, composite }
}

/// Display rounding for marks and percentages.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::services::sections::{grade_choices, SectionScore};

    fn score(section: Section, raw: f64, total: f64) -> SectionScore {
        SectionScore { raw, total, ..SectionScore::empty(section) }
    }

    #[test]
    fn grade_band_boundaries() {
        let policy = GradingPolicy::default();
        assert_eq!(policy.letter(10.0), LetterGrade::A);
        assert_eq!(policy.letter(9.0), LetterGrade::A);
        assert_eq!(policy.letter(8.999), LetterGrade::B);
        assert_eq!(policy.letter(7.0), LetterGrade::B);
        assert_eq!(policy.letter(6.999), LetterGrade::C);
        assert_eq!(policy.letter(5.0), LetterGrade::C);
        assert_eq!(policy.letter(4.999), LetterGrade::F);
        assert_eq!(policy.letter(0.0), LetterGrade::F);
    }

    #[test]
    fn empty_section_contributes_nothing() {
        assert_eq!(weighted_mark(0.0, 0.0, 3.0), 0.0);
        assert_eq!(weighted_mark(4.0, 0.0, 3.0), 0.0);
        assert_eq!(weighted_mark(f64::NAN, 2.0, 3.0), 0.0);
    }

    #[test]
    fn weighted_marks_stay_within_budget() {
        let policy = GradingPolicy::default();
        let scores = [
            score(Section::Mcq, 12.0, 4.0),
            score(Section::TrueFalse, -1.0, 3.0),
            score(Section::Code, 5.0, 5.0),
        ];

        let result = aggregate(&scores, &policy);

        for weighted in &result.sections {
            assert!(weighted.mark >= 0.0 && weighted.mark <= weighted.budget);
        }
        assert_eq!(result.mark(Section::Mcq), 3.0);
        assert_eq!(result.mark(Section::TrueFalse), 0.0);
        assert_eq!(result.composite, 8.0);
        assert_eq!(result.grade, LetterGrade::B);
    }

    #[test]
    fn composite_is_capped_by_total_budget() {
        let policy = GradingPolicy {
            weights: SectionWeights { mcq: 6.0, true_false: 6.0, code: 6.0 },
            ..GradingPolicy::default()
        };
        let scores = [
            score(Section::Mcq, 1.0, 1.0),
            score(Section::TrueFalse, 1.0, 1.0),
            score(Section::Code, 1.0, 1.0),
        ];

        let result = aggregate(&scores, &policy);
        assert_eq!(result.composite, MAX_COMPOSITE_MARK);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let policy = GradingPolicy::default();
        let scores = [
            score(Section::Mcq, 2.0, 3.0),
            score(Section::TrueFalse, 1.0, 4.0),
            score(Section::Code, 3.5, 5.0),
        ];

        assert_eq!(aggregate(&scores, &policy), aggregate(&scores, &policy));
    }

    #[test]
    fn perfect_mcq_section_earns_its_full_budget() {
        let key: BTreeMap<i64, String> = [(1, "C".to_string()), (2, "C".to_string())].into();
        let answers: BTreeMap<i64, String> = [(1, "c".to_string()), (2, "C".to_string())].into();

        let mcq = grade_choices(Section::Mcq, &answers, &key);
        let result = aggregate(&[mcq], &GradingPolicy::default());

        assert_eq!(result.mark(Section::Mcq), 3.0);
        assert_eq!(result.mark(Section::Code), 0.0);
    }

    #[test]
    fn display_rounding() {
        assert_eq!(round2(6.666_666), 6.67);
        assert_eq!(round2(80.0), 80.0);
    }
}
