use anyhow::Context;
use regex::Regex;
use std::path::Path;

/// One validated roster row, ready to upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub name: String,
    pub usn: String,
    pub serial: i64,
    pub year: i64,
    pub semester: i64,
}

#[derive(Debug, Default)]
pub struct RosterImport {
    pub rows: Vec<RosterRow>,
    pub skipped: usize,
}

/// USN stem per branch; the full pattern is `(21|22|23)<stem><1-3 digits>`.
fn usn_stem(branch: &str) -> Option<&'static str> {
    match branch.to_ascii_uppercase().as_str() {
        "CSE" => Some("SECD"),
        "AIML" => Some("SEAI"),
        "AIDS" => Some("SEAD"),
        "CIVIL" => Some("SECV"),
        _ => None,
    }
}

pub fn usn_pattern(branch: &str) -> Option<Regex> {
    let stem = usn_stem(branch)?;
    // The stem is a fixed token, so this always compiles.
    Regex::new(&format!(r"(?i)^(21|22|23){}\d{{1,3}}$", stem)).ok()
}

/// Trailing 1-3 digit roll number at the end of a USN.
pub fn trailing_serial(usn: &str) -> Option<i64> {
    let digits: String = usn
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    digits.parse().ok()
}

fn coerce_or_one(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok()).unwrap_or(1)
}

/// Reads a roster CSV (`name, usn, year, semester` headers) and keeps only
/// rows whose USN matches the branch pattern. Invalid or incomplete rows are
/// counted, not fatal. The result is sorted by the USN's trailing serial.
pub fn parse_roster_csv(path: &Path, branch: &str) -> anyhow::Result<RosterImport> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        name: Option<String>,
        usn: Option<String>,
        year: Option<String>,
        semester: Option<String>,
    }

    let pattern = usn_pattern(branch)
        .with_context(|| format!("no USN pattern defined for branch {}", branch))?;

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open roster csv {}", path.display()))?;

    let mut import = RosterImport::default();
    for result in reader.deserialize::<CsvRow>() {
        let Ok(row) = result else {
            import.skipped += 1;
            continue;
        };

        let name = row.name.as_deref().unwrap_or("").trim().to_string();
        let usn = row
            .usn
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_ascii_uppercase();
        if name.is_empty() || usn.is_empty() || !pattern.is_match(&usn) {
            import.skipped += 1;
            continue;
        }
        let Some(serial) = trailing_serial(&usn) else {
            import.skipped += 1;
            continue;
        };

        import.rows.push(RosterRow {
            name,
            usn,
            serial,
            year: coerce_or_one(row.year.as_deref()),
            semester: coerce_or_one(row.semester.as_deref()),
        });
    }

    import.rows.sort_by_key(|r| r.serial);
    Ok(import)
}

/// Login name derived from the student's name, USN as a fallback.
pub fn derive_username(name: &str, usn: &str) -> String {
    let n = name.trim();
    if n.is_empty() {
        usn.to_string()
    } else {
        n.to_ascii_lowercase().replace(' ', ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_csv(contents: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "portald-roster-{}.csv",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::write(&p, contents).expect("write temp csv");
        p
    }

    #[test]
    fn pattern_accepts_known_branches_only() {
        assert!(usn_pattern("CSE").expect("cse").is_match("21SECD042"));
        assert!(usn_pattern("cse").expect("cse").is_match("23secd9"));
        assert!(usn_pattern("AIDS").expect("aids").is_match("22SEAD107"));
        assert!(!usn_pattern("CSE").expect("cse").is_match("24SECD042"));
        assert!(!usn_pattern("CSE").expect("cse").is_match("21SEAI042"));
        assert!(usn_pattern("MECH").is_none());
    }

    #[test]
    fn import_sorts_by_serial_and_skips_invalid() {
        let path = temp_csv(
            "name,usn,year,semester\n\
             Divya N,21SECD012,2,3\n\
             ,21SECD001,2,3\n\
             Rahul K,21SECD003,2,3\n\
             Wrong Branch,21SEAI005,2,3\n\
             Asha Rao,21secd002,x,3\n",
        );
        let import = parse_roster_csv(&path, "CSE").expect("parse roster");
        std::fs::remove_file(&path).ok();

        assert_eq!(import.skipped, 2);
        let usns: Vec<&str> = import.rows.iter().map(|r| r.usn.as_str()).collect();
        assert_eq!(usns, vec!["21SECD002", "21SECD003", "21SECD012"]);
        // Unparseable year falls back to 1.
        assert_eq!(import.rows[0].year, 1);
        assert_eq!(import.rows[0].semester, 3);
    }

    #[test]
    fn unknown_branch_is_an_error() {
        let path = temp_csv("name,usn\nA,21SECD001\n");
        let result = parse_roster_csv(&path, "MECH");
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn username_derivation() {
        assert_eq!(derive_username("Asha Rao", "21SECD001"), "asha.rao");
        assert_eq!(derive_username("  ", "21SECD001"), "21SECD001");
    }
}
