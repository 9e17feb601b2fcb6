pub mod overview;
pub mod plain;

/// Wall-clock time shown in report headers.
pub fn clock() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
