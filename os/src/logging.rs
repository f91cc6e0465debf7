//! 基于 `log` 门面的内核日志
//!
//! 日志级别在编译期由环境变量 `LOG` 决定，例如 `LOG=DEBUG`。
use log::{Level, LevelFilter, Log, Metadata, Record};

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            level_color(record.level()),
            record.level(),
            record.args(),
        );
    }
    fn flush(&self) {}
}

fn level_color(level: Level) -> u8 {
    match level {
        Level::Error => 31, // 红
        Level::Warn => 93,  // 亮黄
        Level::Info => 34,  // 蓝
        Level::Debug => 32, // 绿
        Level::Trace => 90, // 亮黑
    }
}

/// 把 `LOG` 的取值翻译为日志过滤级别，无法识别时关闭日志
pub fn level_filter(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// 安装日志器；重复调用时保留第一次的设置
pub fn init() {
    static LOGGER: SimpleLogger = SimpleLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level_filter(option_env!("LOG")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_map_to_filters() {
        assert_eq!(level_filter(Some("ERROR")), LevelFilter::Error);
        assert_eq!(level_filter(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(level_filter(Some("debug")), LevelFilter::Off);
        assert_eq!(level_filter(None), LevelFilter::Off);
    }

    #[test]
    fn colors_differ_per_level() {
        assert_eq!(level_color(Level::Error), 31);
        assert_ne!(level_color(Level::Warn), level_color(Level::Info));
    }
}
