//! Small operator CLI. Every command resolves secrets from the process
//! environment exactly as the service would at startup, so `check` doubles as
//! a deploy-time preflight.

use std::env;
use std::process::ExitCode;

use secret_bootstrap::cipher::{EncryptedField, FieldCipher};
use secret_bootstrap::env::ProcessEnv;
use secret_bootstrap::keys::{to_hex, KeyGenerator};
use secret_bootstrap::logging::{self, LogFormat};
use secret_bootstrap::tokens::TokenGenerator;
use secret_bootstrap::{install, ResolvedSecrets};

fn print_usage() {
    eprintln!("Commands:\n  check\n  derive-key <salt>\n  digest-token <purpose> <token>\n  encrypt-field <plaintext> [--deterministic]\n  decrypt-field <json-envelope>");
}

fn main() -> ExitCode {
    logging::init(LogFormat::from_env(&ProcessEnv));

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::FAILURE;
    }

    let resolved = match install(ProcessEnv) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::error!(variables = ?err.variables(), "startup aborted: {err}");
            eprintln!("startup aborted: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run_command(&args[1..], resolved) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_command(args: &[String], resolved: &ResolvedSecrets) -> Result<(), String> {
    match (args[0].as_str(), &args[1..]) {
        ("check", []) => {
            let report = serde_json::to_string_pretty(&resolved.report())
                .map_err(|e| format!("report serialization failed: {e}"))?;
            println!("{report}");
        }
        ("derive-key", [salt]) => {
            let key = KeyGenerator::new(resolved.secret_key_base.secret())
                .generate_key(salt, 32)
                .map_err(|e| format!("derivation failed: {e}"))?;
            println!("{}", to_hex(&key));
        }
        ("digest-token", [purpose, token]) => {
            let digest = TokenGenerator::new(&resolved.auth_secret_key)
                .digest(purpose, token)
                .map_err(|e| format!("digest failed: {e}"))?;
            println!("{digest}");
        }
        ("encrypt-field", [plaintext, rest @ ..]) => {
            let deterministic = match rest {
                [] => false,
                [flag] if flag == "--deterministic" => true,
                _ => {
                    print_usage();
                    return Err("unexpected arguments".to_string());
                }
            };
            let cipher = field_cipher(resolved)?;
            let field = if deterministic {
                cipher.encrypt_deterministic(plaintext.as_bytes())
            } else {
                cipher.encrypt(plaintext.as_bytes())
            }
            .map_err(|e| format!("encryption failed: {e}"))?;
            let json = serde_json::to_string_pretty(&field)
                .map_err(|e| format!("envelope serialization failed: {e}"))?;
            println!("{json}");
        }
        ("decrypt-field", [envelope]) => {
            let field: EncryptedField =
                serde_json::from_str(envelope).map_err(|e| format!("invalid envelope json: {e}"))?;
            let bytes = field_cipher(resolved)?
                .decrypt(&field)
                .map_err(|e| format!("decryption failed: {e}"))?;
            let text = String::from_utf8(bytes)
                .map_err(|e| format!("decryption succeeded but UTF-8 failed: {e}"))?;
            println!("{text}");
        }
        _ => {
            print_usage();
            return Err("unknown command or wrong arguments".to_string());
        }
    }
    Ok(())
}

fn field_cipher(resolved: &ResolvedSecrets) -> Result<FieldCipher, String> {
    FieldCipher::from_state(&resolved.encryption)
        .map_err(|e| format!("cipher setup failed: {e}"))?
        .ok_or_else(|| "field encryption is disabled (ENCRYPTION_ENABLED is not true)".to_string())
}
