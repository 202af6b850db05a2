use std::process;

use structopt::StructOpt;

use octopus::cli::{run, Options};
use octopus::errors::{Error, ProgramError, SystemError, UserError};

fn setup_logger() {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .apply()
        .expect("logger initializes once");
}

fn main() {
    setup_logger();
    let options = Options::from_args();
    if let Err(error) = run(options) {
        log::error!("{:#}", error);
        let code = if error.downcast_ref::<UserError>().is_some() {
            2
        } else if error.downcast_ref::<ProgramError>().is_some() {
            3
        } else if error.downcast_ref::<SystemError>().is_some() {
            4
        } else if let Some(wrapped) = error.downcast_ref::<Error>() {
            wrapped.exit_code()
        } else {
            1
        };
        process::exit(code);
    }
}
