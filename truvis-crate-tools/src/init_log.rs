use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// 初始化全局 logger
///
/// - 设置了 `RUST_LOG` 时使用其中的过滤规则，否则默认 `Info`
/// - 可以重复调用，只有第一次生效（单元测试中每个 test 都会调用）
pub fn init_log() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let black_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(|c| c == '\\' || c == '/').next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            // worker 线程较多，带上线程名方便区分
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("unnamed");

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{thread_name}][{file}:{line}]{grey_style:#} \
                 {black_style}{}{black_style:#}",
                record.args()
            )
        });

        match std::env::var("RUST_LOG") {
            Ok(filter) => {
                builder.parse_filters(&filter);
            }
            Err(_) => {
                builder.filter(None, log::LevelFilter::Info);
            }
        }

        // 测试框架可能已经安装了 logger，这里失败不算错误
        if builder.try_init().is_err() {
            log::debug!("logger already initialized");
        }
    });
}
