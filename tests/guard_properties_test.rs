//! Black-box tests for the query guard.
//!
//! Random and adversarial inputs check the two properties the gateway relies
//! on: denylisted statements never pass, and SELECT-shaped statements always
//! leave the guard with a row bound no larger than the server maximum.

use pg_mcp_gateway::guard::{DENYLIST, GuardMode, QueryGuard, QueryVerdict};
use pg_mcp_gateway::models::QueryRequest;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Randomize the case of every ASCII letter.
fn random_case(s: &str) -> String {
    let mut rng = rand::thread_rng();
    s.chars()
        .map(|c| {
            if rng.gen_bool(0.5) {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect()
}

/// Whitespace and comments that may precede the first keyword.
fn random_prefix() -> String {
    let prefixes = [
        "",
        " ",
        "\n\t ",
        "-- note\n",
        "/* header */",
        "/* outer /* nested */ still comment */ ",
        "--\n--\n",
        "\r\n/**/",
    ];
    prefixes
        .choose(&mut rand::thread_rng())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn guards() -> Vec<QueryGuard> {
    vec![
        QueryGuard::new(10_000, GuardMode::Keyword),
        QueryGuard::new(10_000, GuardMode::Strict),
    ]
}

#[test]
fn test_denylisted_keywords_never_pass() {
    for guard in guards() {
        for keyword in DENYLIST {
            for _ in 0..20 {
                let sql = format!(
                    "{}{} {}",
                    random_prefix(),
                    random_case(keyword),
                    random_string(12)
                );
                let verdict = guard.classify(&QueryRequest::new(sql.clone()));
                match verdict {
                    QueryVerdict::Rejected { reason } => {
                        assert!(
                            reason.contains(keyword),
                            "reason {reason:?} should name {keyword} for {sql:?}"
                        );
                    }
                    QueryVerdict::Allowed(_) => panic!("{sql:?} passed the guard"),
                }
            }
        }
    }
}

#[test]
fn test_select_always_leaves_bounded() {
    let guard = QueryGuard::new(500, GuardMode::Keyword);
    let mut rng = rand::thread_rng();

    for _ in 0..200 {
        let requested: u32 = rng.gen_range(0..5_000);
        let sql = format!(
            "{}{} {} AS {}",
            random_prefix(),
            random_case("select"),
            rng.gen_range(0..1000),
            format!("c_{}", random_string(6))
        );
        let request = QueryRequest::new(sql.clone()).with_limit(requested);
        let allowed = guard
            .classify(&request)
            .into_result()
            .unwrap_or_else(|e| panic!("{sql:?} rejected: {e}"));

        assert!(allowed.rewritten);
        assert!(allowed.limit >= 1 && allowed.limit <= 500);
        assert!(
            allowed.sql.ends_with(&format!(" LIMIT {}", allowed.limit)),
            "{:?} should end with its bound",
            allowed.sql
        );
    }
}

#[test]
fn test_existing_bound_is_never_duplicated() {
    let guard = QueryGuard::new(10_000, GuardMode::Keyword);
    let bounded = [
        "SELECT * FROM t LIMIT 5",
        "select * from t limit 5 offset 10",
        "SELECT * FROM t ORDER BY id FETCH FIRST 3 ROWS ONLY",
        "SELECT * FROM t FETCH NEXT 1 ROW ONLY",
        "WITH x AS (SELECT 1) SELECT * FROM x LIMIT 2",
    ];
    for sql in bounded {
        let allowed = guard.classify(&QueryRequest::new(sql)).into_result().unwrap();
        assert!(!allowed.rewritten, "{sql:?} was rewritten");
        assert_eq!(allowed.sql, sql);
    }
}

#[test]
fn test_keywords_inside_literals_and_identifiers_are_harmless() {
    let guard = QueryGuard::new(10_000, GuardMode::Strict);
    let queries = [
        "SELECT 'DROP TABLE users' AS s",
        "SELECT \"delete\" FROM audit",
        "SELECT created_at, updated_at FROM t",
        "SELECT * FROM insert_log",
    ];
    for sql in queries {
        assert!(guard.classify(&QueryRequest::new(sql)).is_allowed(), "{sql:?}");
    }
}

#[test]
fn test_garbage_input_never_panics() {
    let edge_cases = vec![
        String::new(),
        " ".repeat(50),
        "\0".to_string(),
        "🚀".repeat(100),
        "'; DROP TABLE users--".to_string(),
        "/* unterminated".to_string(),
        "'unterminated".to_string(),
        "--".to_string(),
        ";;;;".to_string(),
        "(((((".to_string(),
        "a".repeat(100_000),
        random_string(1000),
    ];

    for guard in guards() {
        for sql in &edge_cases {
            let _ = guard.classify(&QueryRequest::new(sql.clone()));
            let _ = guard.classify(&QueryRequest::new(sql.clone()).with_limit(u32::MAX));
            let _ = guard.classify(&QueryRequest::new(sql.clone()).with_limit(0));
        }
    }
}

#[test]
fn test_comment_only_input_is_rejected() {
    for guard in guards() {
        for sql in ["", "   ", "-- just a note", "/* nothing */", "/* a */ -- b\n"] {
            let verdict = guard.classify(&QueryRequest::new(sql));
            assert!(!verdict.is_allowed(), "{sql:?} was allowed");
        }
    }
}
