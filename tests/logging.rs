// tests/logging.rs

use countdag::cli::LogLevel;
use countdag::logging::build_filter;
use tracing_subscriber::filter::LevelFilter;

#[test]
fn cli_level_wins_over_the_environment() {
    let filter = build_filter(Some(LogLevel::Warn), Some("trace")).unwrap();
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
}

#[test]
fn environment_takes_per_target_directives() {
    let filter = build_filter(None, Some("info,countdag::exec=debug")).unwrap();
    assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    assert!(filter.to_string().contains("countdag::exec=debug"));
}

#[test]
fn blank_or_missing_environment_means_info() {
    for env in [None, Some(""), Some("   ")] {
        let filter = build_filter(None, env).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}

#[test]
fn malformed_directives_are_rejected() {
    let err = build_filter(None, Some("countdag=loud")).unwrap_err();
    assert!(format!("{err:#}").contains("COUNTDAG_LOG"));
}
