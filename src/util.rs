// Log line formatter for `env_logger`: colored by level, prefixed with the
// source location so that solver iterations can be traced back to the code.
pub fn format_log(
  buf: &mut env_logger::fmt::Formatter,
  record: &log::Record,
) -> std::io::Result<()> {
  use std::io::Write;
  let mut style = buf.style();
  use env_logger::fmt::Color::*;
  use log::Level::*;
  let (color, tag) = match record.level() {
    Error => (Red, "E"),
    Warn => (Yellow, "W"),
    Info => (Green, "I"),
    Debug => (Magenta, "D"),
    Trace => (Blue, "T"),
  };
  style.set_color(color);

  let location = format!("{}:{}",
    record.file().unwrap_or("?"),
    record.line().unwrap_or(0),
  );
  let s = format!("{} {:32}{}", tag, location, record.args());
  writeln!(buf, "{}", style.value(s))
}

pub fn init_logging(level: log::LevelFilter) {
  // `try_init` so that repeated initialization (tests, library users) is harmless.
  let _ = env_logger::Builder::new()
    .filter_level(level)
    .format(format_log)
    .try_init();
}
