use serde::Serialize;

/// One subject's raw assessment cells exactly as entered in the marks grid.
/// Cells are free-form text; blanks and garbage are legal and normalize to 0.
#[derive(Debug, Clone, Default)]
pub struct RawSubjectRow {
    pub subject: String,
    pub ia1: String,
    pub ia2: String,
    pub ia3: String,
    pub attendance: String,
}

/// A subject's scores after normalization: all four fields are integers,
/// IA scores are non-negative, attendance is within [0, 100].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject: String,
    pub ia1: i64,
    pub ia2: i64,
    pub ia3: i64,
    pub attendance: i64,
}

/// 1-decimal rounding used on every report surface: `Int(10*x + 0.5) / 10`.
pub fn round_to_tenth(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn round_to_hundredth(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

fn coerce_ia(raw: &str) -> i64 {
    raw.trim().parse::<i64>().unwrap_or(0).max(0)
}

fn coerce_attendance(raw: &str) -> i64 {
    raw.trim().parse::<i64>().unwrap_or(0).clamp(0, 100)
}

/// Converts raw grid rows into well-typed scores. Total: every input row
/// appears in the output, every field is populated, and no input makes this
/// fail. Empty, missing, or non-numeric cells become 0.
pub fn normalize(rows: &[RawSubjectRow]) -> Vec<SubjectScore> {
    rows.iter()
        .map(|r| SubjectScore {
            subject: r.subject.clone(),
            ia1: coerce_ia(&r.ia1),
            ia2: coerce_ia(&r.ia2),
            ia3: coerce_ia(&r.ia3),
            attendance: coerce_attendance(&r.attendance),
        })
        .collect()
}

pub const IA_MAX_TOTAL: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub subject: String,
    /// IA1 + IA2 + IA3, in [0, 90] for normalized input.
    pub total: i64,
    pub eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReport {
    pub per_subject: Vec<SubjectAggregate>,
    pub average_ia: f64,
    pub average_attendance: f64,
    pub top_subject: Option<String>,
    pub gpa: f64,
}

/// Derives per-student summary metrics from normalized scores. Pure; the
/// zero-subject case yields zeroed averages and no top subject rather than
/// a division fault. Ties for the top subject keep the earliest row
/// (strict `>` scan in input order).
pub fn aggregate(scores: &[SubjectScore], eligibility_threshold: f64) -> AggregatedReport {
    let mut per_subject = Vec::with_capacity(scores.len());
    let mut ia_sum: i64 = 0;
    let mut attendance_sum: i64 = 0;
    let mut percent_sum: f64 = 0.0;
    let mut top: Option<(String, i64)> = None;

    for s in scores {
        let total = s.ia1 + s.ia2 + s.ia3;
        ia_sum += total;
        attendance_sum += s.attendance;
        percent_sum += 100.0 * total as f64 / IA_MAX_TOTAL as f64;

        if top.as_ref().map(|(_, best)| total > *best).unwrap_or(true) {
            top = Some((s.subject.clone(), total));
        }

        per_subject.push(SubjectAggregate {
            subject: s.subject.clone(),
            total,
            eligible: s.attendance as f64 >= eligibility_threshold,
        });
    }

    let count = scores.len();
    let (average_ia, average_attendance, gpa) = if count == 0 {
        (0.0, 0.0, 0.0)
    } else {
        (
            round_to_tenth(ia_sum as f64 / (3 * count) as f64),
            round_to_tenth(attendance_sum as f64 / count as f64),
            round_to_hundredth(percent_sum / count as f64 / 10.0),
        )
    };

    AggregatedReport {
        per_subject,
        average_ia,
        average_attendance,
        top_subject: top.map(|(subject, _)| subject),
        gpa,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub name: String,
    pub usn: String,
    pub branch: String,
    pub term: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject: String,
    pub ia1: i64,
    pub ia2: i64,
    pub ia3: i64,
    pub attendance: i64,
    pub total: i64,
    pub eligible: bool,
}

/// The tabular view model the host templating layer binds directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMarksModel {
    pub student: StudentIdentity,
    pub subjects: Vec<SubjectLine>,
    pub average_ia: f64,
    pub average_attendance: f64,
    pub top_subject: Option<String>,
    pub gpa: f64,
}

/// Shapes normalized scores plus their aggregates into the on-screen table.
/// Row order matches the input subject order; summary scalars are taken
/// verbatim from the aggregate so both report surfaces show the same numbers.
pub fn student_marks_model(
    student: StudentIdentity,
    scores: &[SubjectScore],
    report: &AggregatedReport,
) -> StudentMarksModel {
    let subjects = scores
        .iter()
        .zip(report.per_subject.iter())
        .map(|(s, a)| SubjectLine {
            subject: s.subject.clone(),
            ia1: s.ia1,
            ia2: s.ia2,
            ia3: s.ia3,
            attendance: s.attendance,
            total: a.total,
            eligible: a.eligible,
        })
        .collect();

    StudentMarksModel {
        student,
        subjects,
        average_ia: report.average_ia,
        average_attendance: report.average_attendance,
        top_subject: report.top_subject.clone(),
        gpa: report.gpa,
    }
}
