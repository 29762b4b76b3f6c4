use rusqlite::Connection;
use serde::Serialize;

/// Institution grade table: lower percentage bound (inclusive) -> grade point.
/// Bands are half-open above the bound except the top band, which includes 100.
/// Kept table-driven so policy changes never touch the aggregation below.
const GRADE_BANDS: &[(f64, f64)] = &[
    (90.0, 10.0),
    (80.0, 9.0),
    (70.0, 8.0),
    (60.0, 7.0),
    (50.0, 6.0),
    (40.0, 5.0),
];

/// 2-decimal rounding used for SGPA: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn grade_point(percentage: f64) -> f64 {
    for &(bound, point) in GRADE_BANDS {
        if percentage >= bound {
            return point;
        }
    }
    0.0
}

pub fn course_percentage(total_obtained: f64, total_max: f64) -> f64 {
    if total_max > 0.0 {
        100.0 * total_obtained / total_max
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<rusqlite::Error> for GradeError {
    fn from(e: rusqlite::Error) -> Self {
        GradeError::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRow {
    pub exam_type: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGrade {
    pub offering_id: String,
    pub course_code: String,
    pub course_name: String,
    pub credits: i64,
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    pub grade_point: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SgpaReport {
    pub student_id: String,
    pub semester_id: String,
    pub sgpa: f64,
    pub total_credits: i64,
    pub courses: Vec<CourseGrade>,
}

/// Credit-weighted SGPA over already-graded courses. Offerings with no marks
/// rows never reach this function; offerings with rows but zero max marks
/// contribute 0 points while still weighing in with their credits.
pub fn compute_sgpa(courses: &[CourseGrade]) -> f64 {
    let mut point_sum = 0.0_f64;
    let mut credit_sum = 0.0_f64;
    for c in courses {
        point_sum += c.grade_point * (c.credits as f64);
        credit_sum += c.credits as f64;
    }
    if credit_sum > 0.0 {
        round_off_2_decimals(point_sum / credit_sum)
    } else {
        0.0
    }
}

pub fn component_rows(
    conn: &Connection,
    student_id: &str,
    offering_id: &str,
) -> Result<Vec<ComponentRow>, GradeError> {
    let mut stmt = conn.prepare(
        "SELECT exam_type, marks_obtained, max_marks
         FROM marks
         WHERE student_id = ? AND offering_id = ?
         ORDER BY exam_type",
    )?;
    let rows = stmt
        .query_map((student_id, offering_id), |r| {
            Ok(ComponentRow {
                exam_type: r.get(0)?,
                marks_obtained: r.get(1)?,
                max_marks: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One CourseGrade per offering in the semester that has at least one marks
/// row for the student. Offerings the student never sat a component for are
/// excluded entirely, not zero-weighted.
pub fn graded_courses(
    conn: &Connection,
    student_id: &str,
    semester_id: &str,
) -> Result<Vec<CourseGrade>, GradeError> {
    let mut stmt = conn.prepare(
        "SELECT o.id, c.code, c.name, c.credits,
                COALESCE(SUM(m.marks_obtained), 0),
                COALESCE(SUM(m.max_marks), 0)
         FROM marks m
         JOIN course_offerings o ON o.id = m.offering_id
         JOIN courses c ON c.id = o.course_id
         WHERE m.student_id = ? AND o.semester_id = ?
         GROUP BY o.id, c.code, c.name, c.credits
         ORDER BY c.code",
    )?;
    let rows = stmt
        .query_map((student_id, semester_id), |r| {
            let total_obtained: f64 = r.get(4)?;
            let total_max: f64 = r.get(5)?;
            let percentage = course_percentage(total_obtained, total_max);
            Ok(CourseGrade {
                offering_id: r.get(0)?,
                course_code: r.get(1)?,
                course_name: r.get(2)?,
                credits: r.get(3)?,
                total_obtained,
                total_max,
                percentage,
                grade_point: grade_point(percentage),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn sgpa_report(
    conn: &Connection,
    student_id: &str,
    semester_id: &str,
) -> Result<SgpaReport, GradeError> {
    let courses = graded_courses(conn, student_id, semester_id)?;
    let sgpa = compute_sgpa(&courses);
    let total_credits = courses.iter().map(|c| c.credits).sum();
    Ok(SgpaReport {
        student_id: student_id.to_string(),
        semester_id: semester_id.to_string(),
        sgpa,
        total_credits,
        courses,
    })
}
