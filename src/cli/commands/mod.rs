use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("vigil")
        .about("Client-side security session guard")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("state-dir")
                .short('s')
                .long("state-dir")
                .help("Directory for the persisted guard state")
                .default_value(".vigil")
                .env("VIGIL_STATE_DIR"),
        )
        .arg(
            Arg::new("session-timeout")
                .short('t')
                .long("session-timeout")
                .help("Inactivity timeout in seconds before the session expires")
                .default_value("300")
                .env("VIGIL_SESSION_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("warning-seconds")
                .short('w')
                .long("warning-seconds")
                .help("Size of the expiry warning window in seconds (0 disables it)")
                .default_value("30")
                .env("VIGIL_WARNING_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-attempts")
                .short('m')
                .long("max-attempts")
                .help("Failed login attempts before a lockout opens")
                .default_value("5")
                .env("VIGIL_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("lockout-seconds")
                .short('l')
                .long("lockout-seconds")
                .help("Duration of the first lockout in seconds (doubles each time)")
                .default_value("30")
                .env("VIGIL_LOCKOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("VIGIL_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
