use std::io::Write;

/// 初始化 env_logger：带时间戳和 `file:line` 的彩色输出
///
/// 默认日志级别为 Info，可以通过 `RUST_LOG` 环境变量覆盖。
pub fn init_log() {
    env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).fg_color(Some(level_color(record.level())));
            let grey_style =
                buf.default_level_style(record.level()).fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(
                    110, 110, 110,
                ))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "{level_style}[{time}] {}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.level(),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn level_color(level: log::Level) -> anstyle::Color {
    match level {
        log::Level::Info => anstyle::Color::Ansi(anstyle::AnsiColor::Green),
        log::Level::Warn => anstyle::Color::Ansi(anstyle::AnsiColor::Yellow),
        log::Level::Error => anstyle::Color::Ansi(anstyle::AnsiColor::Red),
        log::Level::Debug => anstyle::Color::Ansi(anstyle::AnsiColor::Cyan),
        log::Level::Trace => anstyle::Color::Ansi(anstyle::AnsiColor::White),
    }
}
