use std::io::{self, Write};

use minim_engine::{self, Value};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_repl()
}

fn run_repl() {
    let mut buf = String::new();
    let stdin = io::stdin();
    let mut count = 0;

    // Console environment.
    let env = minim_engine::new_env().expect("failed creating new core environment");

    loop {
        count += 1;
        buf.clear();
        print!("{count} > ");
        let _ = io::stdout().flush();
        if stdin.read_line(&mut buf).expect("read stdin") == 0 {
            // End-of-file.
            break;
        }

        match minim_engine::eval_str(&env, buf.as_str()) {
            Ok(Value::Nil) => {
                // Don't print the "nothing" value.
            }
            Ok(value) => {
                println!("{}", value.repr());
            }
            Err(err) => {
                eprintln!("error: {err}");
            }
        }
    }
}
