use mailsink::{Config, SmtpServer};
use std::env;
use std::io;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let addr = if args.len() > 1 {
        args[1].as_str()
    } else {
        "127.0.0.1:2525"
    };

    let banner = if args.len() > 2 {
        args[2].as_str()
    } else {
        "mailsink.local"
    };

    let read_timeout = match args.get(3).map(|secs| secs.parse::<u64>()) {
        Some(Ok(secs)) => Duration::from_secs(secs),
        Some(Err(e)) => {
            eprintln!("Invalid read timeout {:?}: {e}", args[3]);
            std::process::exit(2);
        }
        None => Duration::from_secs(300),
    };

    let config = Config::new(addr)
        .with_banner(banner)
        .with_read_timeout(read_timeout);

    let (server, messages) = match SmtpServer::bind(config) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("Starting mailsink SMTP server...");
    println!("Address: {}", server.local_addr());
    println!("Banner: {banner}");

    let consumer = thread::spawn(move || {
        let mut count = 0;
        while let Ok(message) = messages.recv() {
            count += 1;
            println!(
                "Received message #{} from: {} to: {:?} ({} bytes)",
                count,
                message.from,
                message.to.iter().map(ToString::to_string).collect::<Vec<_>>(),
                message.body_size()
            );
            if let Some(subject) = message.subject() {
                println!("  Subject: {subject}");
            }
        }
    });

    println!("Close stdin (Ctrl-D) to stop.");
    if let Err(e) = io::copy(&mut io::stdin().lock(), &mut io::sink()) {
        eprintln!("Failed to read stdin: {e}");
    }

    // Closing the server closes the channel, which ends the consumer.
    server.close(true);
    if consumer.join().is_err() {
        eprintln!("Message consumer panicked");
    }
}
