// Test-only fixture for `tests/scenarios.rs`: reads either a named input
// file or stdin, writes it to a named output file or stdout, and can print
// literal stdout/stderr messages and exit with a requested code. Not part
// of the public crate surface.

use std::fs;
use std::io::{Read, Write};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut content_a: Option<Vec<u8>> = None;
    let mut content_b: Option<Vec<u8>> = None;
    let mut out_a: Option<String> = None;
    let mut out_b: Option<String> = None;
    let mut msg_out: Option<String> = None;
    let mut msg_err: Option<String> = None;
    let mut code: i32 = 0;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-i" => {
                content_a = Some(fs::read(&args[i + 1]).expect("read -i"));
                i += 2;
            }
            "-x" => {
                content_b = Some(fs::read(&args[i + 1]).expect("read -x"));
                i += 2;
            }
            "-o" => {
                out_a = Some(args[i + 1].clone());
                i += 2;
            }
            "-z" => {
                out_b = Some(args[i + 1].clone());
                i += 2;
            }
            "-m" => {
                msg_out = Some(args[i + 1].clone());
                i += 2;
            }
            "-f" => {
                msg_err = Some(args[i + 1].clone());
                i += 2;
            }
            "-r" => {
                code = args[i + 1].parse().expect("parse -r");
                i += 2;
            }
            _ => i += 1,
        }
    }

    if content_a.is_none() && msg_out.is_none() {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).ok();
        if !buf.is_empty() {
            content_a = Some(buf);
        }
    }

    if let Some(data) = &content_a {
        match &out_a {
            Some(path) => fs::write(path, data).expect("write -o"),
            None => std::io::stdout().write_all(data).expect("write stdout"),
        }
    } else if let Some(msg) = &msg_out {
        std::io::stdout().write_all(msg.as_bytes()).expect("write stdout");
    }

    if let Some(data) = &content_b {
        if let Some(path) = &out_b {
            fs::write(path, data).expect("write -z");
        }
    }

    if let Some(msg) = &msg_err {
        eprint!("{msg}");
    }

    std::process::exit(code);
}
