use std::collections::VecDeque;

use keygate::auth::{hash_key, is_valid_format, key_prefix, GeneratedKey, SessionValidator};

fn print_help() {
    eprintln!(
        "\
keygate-admin

USAGE:
  keygate-admin <command> [options]

COMMANDS:
  generate-key                    Generate an API key with its prefix and digest
  hash-key <key>                  Print the prefix and digest of an existing key
  issue-session                   Issue a session token (for testing)

issue-session OPTIONS:
  --user-id <id>                  (required)
  --address <addr>                (optional)
  --client-id <id>                (optional)
  --client-name <name>            (optional)
  --ttl-secs <n>                  (default: 3600)
  --secret <secret>               (defaults to env SESSION_SECRET)
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "generate-key" => {
            if let Some(other) = args.pop_front() {
                anyhow::bail!("unexpected argument: {other}");
            }

            let key = GeneratedKey::new();
            println!("key:    {}", key.plaintext);
            println!("prefix: {}", key.prefix);
            println!("hash:   {}", key.hash);
            eprintln!("store the prefix and hash; the key is not recoverable");
            Ok(())
        }
        "hash-key" => {
            let key = take_value(&mut args, "hash-key")?;
            if !is_valid_format(&key) {
                anyhow::bail!("not a well-formed API key");
            }

            println!("prefix: {}", key_prefix(&key)?);
            println!("hash:   {}", hash_key(&key));
            Ok(())
        }
        "issue-session" => {
            let mut user_id: Option<String> = None;
            let mut address: Option<String> = None;
            let mut client_id: Option<String> = None;
            let mut client_name: Option<String> = None;
            let mut ttl_secs: i64 = 3600;
            let mut secret: Option<String> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--user-id" => user_id = Some(take_value(&mut args, "--user-id")?),
                    "--address" => address = Some(take_value(&mut args, "--address")?),
                    "--client-id" => client_id = Some(take_value(&mut args, "--client-id")?),
                    "--client-name" => {
                        client_name = Some(take_value(&mut args, "--client-name")?)
                    }
                    "--ttl-secs" => ttl_secs = take_value(&mut args, "--ttl-secs")?.parse()?,
                    "--secret" => secret = Some(take_value(&mut args, "--secret")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let user_id = user_id.ok_or_else(|| anyhow::anyhow!("--user-id is required"))?;
            let secret = secret
                .or_else(|| std::env::var("SESSION_SECRET").ok())
                .ok_or_else(|| anyhow::anyhow!("SESSION_SECRET is required (or pass --secret)"))?;

            let token = SessionValidator::new(secret.as_bytes()).issue(
                &user_id,
                address.as_deref(),
                client_id.as_deref(),
                client_name.as_deref(),
                chrono::Duration::seconds(ttl_secs),
            )?;
            println!("{token}");
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
