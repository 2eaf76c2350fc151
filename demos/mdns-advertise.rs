use std::{env, process, thread, time::Duration};

use log::LevelFilter;
use mdns_responder::{Responder, Service};

fn main() -> mdns_responder::Result<()> {
    env_logger::Builder::new()
        .filter_module("mdns_responder", LevelFilter::Debug)
        .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace)
        .parse_default_env()
        .init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    let (name, service_type, port) = match &*args {
        [name, service_type, port] => match port.parse::<u16>() {
            Ok(port) => (name.as_str(), service_type.as_str(), port),
            Err(e) => {
                eprintln!("invalid port `{port}`: {e}");
                process::exit(1);
            }
        },
        _ => {
            eprintln!("usage: mdns-advertise <name> <_type._proto> <port>");
            process::exit(1);
        }
    };

    let service = Service::builder(name, service_type, port)
        .txt("txtvers", "1")
        .build()?;
    println!("advertising {}", service);

    let responder = Responder::new()?;
    let _handle = responder.advertise(service)?;

    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}
