use std::{env, process, thread, time::Duration};

use log::LevelFilter;
use mdns_responder::{RecordType, Responder};

fn main() -> mdns_responder::Result<()> {
    env_logger::Builder::new()
        .filter_module("mdns_responder", LevelFilter::Debug)
        .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace)
        .parse_default_env()
        .init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    let (name, ty) = match &*args {
        [] => ("*", RecordType::ANY),
        [name] => (name.as_str(), RecordType::ANY),
        [name, ty] => match ty.parse() {
            Ok(ty) => (name.as_str(), ty),
            Err(_) => {
                eprintln!("unknown record type `{ty}`");
                process::exit(1);
            }
        },
        _ => {
            eprintln!("usage: mdns-watch [name|*] [type]");
            process::exit(1);
        }
    };

    let responder = Responder::new()?;
    let _query = responder.background_query(name, ty, |answer| {
        println!("{}", answer);
        Ok::<_, std::convert::Infallible>(())
    })?;

    loop {
        thread::sleep(Duration::from_secs(30));
        print!("{}", responder.snapshot());
    }
}
