//! drivefs - command-line access to Google Drive as a filesystem
//!
//! Runs one filesystem operation per invocation against Drive, or against an
//! in-memory store with `--memory`.

use std::env;
use std::io::{self, Read, Write};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use drivefs::drive::{Permission, SearchQuery, ShareRole};
use drivefs::{
    Credentials, DriveClient, DriveFs, DriveFsConfig, DriveStore, DriveUrl, MemoryStore,
};

/// CLI command
#[derive(Debug)]
enum Command {
    /// List a directory
    Ls { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Write stdin to a file
    Put { path: String },
    /// Create a directory
    Mkdir { path: String, parents: bool },
    /// Move or rename
    Mv {
        src: String,
        dst: String,
        overwrite: bool,
    },
    /// Copy a file
    Cp {
        src: String,
        dst: String,
        overwrite: bool,
    },
    /// Remove a file
    Rm { path: String },
    /// Remove a directory
    Rmdir { path: String, recursive: bool },
    /// Show attributes as JSON
    Info { path: String },
    /// Export a native document
    Export { path: String, mime_type: String },
    /// Create a shortcut to a file
    Ln { target: String, path: String },
    /// Search the whole drive
    Find {
        name: Option<String>,
        mime_type: Option<String>,
    },
    /// Share and print the URL
    Share {
        path: String,
        role: ShareRole,
        email: Option<String>,
    },
    /// Print the sharing URL
    Url { path: String },
    /// Show help
    Help,
}

/// Where the filesystem lives
#[derive(Debug)]
enum Target {
    Drive { url: Option<String> },
    Memory,
}

fn print_help() {
    eprintln!(
        r#"drivefs - Google Drive as a hierarchical filesystem

USAGE:
    drivefs [--url <googledrive://...>] [--memory] <command> [args]

COMMANDS:
    ls <path>                   List a directory
    cat <path>                  Print a file to stdout
    put <path>                  Write stdin to a file
    mkdir [-p] <path>           Create a directory (-p: with parents)
    mv [-f] <src> <dst>         Move or rename (-f: overwrite a file)
    cp [-f] <src> <dst>         Copy a file (-f: overwrite)
    rm <path>                   Remove a file
    rmdir [-r] <path>           Remove a directory (-r: with its contents)
    info <path>                 Show attributes as JSON
    export <path> <mime-type>   Export a Google document
    ln <target> <path>          Create a shortcut at <path> to the file <target>
    find [--name N] [--type M]  Search the whole drive by name and MIME type
    share [--role R] [--email E] <path>
                                Share (default: reader, anyone with the link)
    url <path>                  Print the sharing URL of a shared item
    help                        Show this help message

OPTIONS:
    --url <url>   googledrive://[/dir]?access_token=..&root_id=..&drive_id=..
    --memory      Use a throwaway in-memory store

EXAMPLES:
    GOOGLEDRIVEFS_ACCESS_TOKEN=ya29... drivefs ls /
    echo hello | drivefs put /notes/hello.txt
    drivefs --url 'googledrive:///projects?root_id=0AbC' cat /README.md

ENVIRONMENT:
    GOOGLEDRIVEFS_ACCESS_TOKEN       OAuth bearer token
    GOOGLEDRIVEFS_CREDENTIALS_PATH   Credentials JSON (default: <config dir>/drivefs/credentials.json)
    RUST_LOG                         Log filter (trace, debug, info, warn, error)
"#
    );
}

/// Split off `flag` if present
fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == name) {
        Some(pos) if pos + 1 < args.len() => {
            let value = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(value))
        }
        Some(_) => Err(anyhow!("{} needs a value", name)),
        None => Ok(None),
    }
}

fn parse_args() -> Result<(Target, Command)> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let memory = take_flag(&mut args, "--memory");
    let url = take_option(&mut args, "--url")?;
    let target = if memory {
        Target::Memory
    } else {
        Target::Drive { url }
    };

    if args.is_empty() {
        return Ok((target, Command::Help));
    }
    let name = args.remove(0);

    let one = |args: &[String], usage: &str| -> Result<String> {
        match args {
            [path] => Ok(path.clone()),
            _ => Err(anyhow!("Usage: drivefs {}", usage)),
        }
    };
    let two = |args: &[String], usage: &str| -> Result<(String, String)> {
        match args {
            [a, b] => Ok((a.clone(), b.clone())),
            _ => Err(anyhow!("Usage: drivefs {}", usage)),
        }
    };

    let command = match name.as_str() {
        "ls" => Command::Ls {
            path: args.first().cloned().unwrap_or_else(|| "/".to_string()),
        },
        "cat" => Command::Cat {
            path: one(&args, "cat <path>")?,
        },
        "put" => Command::Put {
            path: one(&args, "put <path>")?,
        },
        "mkdir" => {
            let parents = take_flag(&mut args, "-p");
            Command::Mkdir {
                path: one(&args, "mkdir [-p] <path>")?,
                parents,
            }
        }
        "mv" => {
            let overwrite = take_flag(&mut args, "-f");
            let (src, dst) = two(&args, "mv [-f] <src> <dst>")?;
            Command::Mv { src, dst, overwrite }
        }
        "cp" => {
            let overwrite = take_flag(&mut args, "-f");
            let (src, dst) = two(&args, "cp [-f] <src> <dst>")?;
            Command::Cp { src, dst, overwrite }
        }
        "rm" => Command::Rm {
            path: one(&args, "rm <path>")?,
        },
        "rmdir" => {
            let recursive = take_flag(&mut args, "-r");
            Command::Rmdir {
                path: one(&args, "rmdir [-r] <path>")?,
                recursive,
            }
        }
        "info" => Command::Info {
            path: one(&args, "info <path>")?,
        },
        "export" => {
            let (path, mime_type) = two(&args, "export <path> <mime-type>")?;
            Command::Export { path, mime_type }
        }
        "ln" => {
            let (target, path) = two(&args, "ln <target> <path>")?;
            Command::Ln { target, path }
        }
        "find" => {
            let name = take_option(&mut args, "--name")?;
            let mime_type = take_option(&mut args, "--type")?;
            if name.is_none() && mime_type.is_none() {
                return Err(anyhow!("Usage: drivefs find [--name N] [--type M]"));
            }
            Command::Find { name, mime_type }
        }
        "share" => {
            let role = match take_option(&mut args, "--role")? {
                Some(role) => role.parse::<ShareRole>()?,
                None => ShareRole::Reader,
            };
            let email = take_option(&mut args, "--email")?;
            Command::Share {
                path: one(&args, "share [--role R] [--email E] <path>")?,
                role,
                email,
            }
        }
        "url" => Command::Url {
            path: one(&args, "url <path>")?,
        },
        "help" | "--help" | "-h" => Command::Help,
        other => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };
    Ok((target, command))
}

/// Build the filesystem for the chosen target
fn open_fs(target: Target) -> Result<DriveFs> {
    let config = DriveFsConfig::default();

    let (url, config) = match target {
        Target::Memory => {
            debug!("Using in-memory store");
            let fs = DriveFs::new(Arc::new(MemoryStore::new()), config)?;
            return Ok(fs);
        }
        Target::Drive { url: Some(raw) } => {
            let url = DriveUrl::parse(&raw).context("Failed to parse --url")?;
            let config = url.apply(config);
            (Some(url), config)
        }
        Target::Drive { url: None } => (None, config),
    };

    let credentials = match url.as_ref().and_then(|u| u.credentials.clone()) {
        Some(credentials) => credentials,
        None => Credentials::load().context("Failed to load credentials")?,
    };

    let client = DriveClient::new(&credentials.access_token)
        .context("Failed to create Drive client")?
        .with_drive_id(config.drive_id.clone())
        .with_page_size(config.page_size);
    let store = DriveStore::new(client).context("Failed to start Drive store")?;
    let fs = DriveFs::new(Arc::new(store), config).context("Failed to open Drive root")?;

    match url {
        Some(url) if url.path != "/" => fs
            .open_dir(&url.path)
            .with_context(|| format!("Failed to open {}", url.path)),
        _ => Ok(fs),
    }
}

fn run(fs: &DriveFs, command: Command) -> Result<()> {
    match command {
        Command::Ls { path } => {
            let mut out = io::stdout().lock();
            for entry in fs.list(&path)? {
                let marker = if entry.is_dir { "/" } else { "" };
                writeln!(out, "{}{}", entry.name, marker)?;
            }
        }
        Command::Cat { path } => {
            let data = fs.read_bytes(&path)?;
            io::stdout().write_all(&data)?;
        }
        Command::Put { path } => {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read stdin")?;
            let object = fs.write_bytes(&path, &data)?;
            eprintln!("Wrote {} bytes to {} ({})", data.len(), path, object.id);
        }
        Command::Mkdir { path, parents } => {
            if parents {
                fs.make_directories(&path, true)?;
            } else {
                fs.make_directory(&path, false)?;
            }
        }
        Command::Mv { src, dst, overwrite } => fs.move_path(&src, &dst, overwrite)?,
        Command::Cp { src, dst, overwrite } => {
            fs.copy(&src, &dst, overwrite)?;
        }
        Command::Rm { path } => fs.remove(&path)?,
        Command::Rmdir { path, recursive } => fs.remove_directory(&path, recursive)?,
        Command::Info { path } => {
            let info = fs.info(&path)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Export { path, mime_type } => {
            let data = fs.export(&path, &mime_type)?;
            io::stdout().write_all(&data)?;
        }
        Command::Ln { target, path } => {
            let id = fs.add_shortcut(&path, &target)?;
            eprintln!("Linked {} -> {} ({})", path, target, id);
        }
        Command::Find { name, mime_type } => {
            let query = match (name, mime_type) {
                (Some(name), Some(mime_type)) => {
                    SearchQuery::mime_type(mime_type).and(SearchQuery::name(name))
                }
                (Some(name), None) => SearchQuery::name(name),
                (None, Some(mime_type)) => SearchQuery::mime_type(mime_type),
                (None, None) => SearchQuery::And(Vec::new()),
            };
            let mut out = io::stdout().lock();
            for info in fs.search(&query)? {
                writeln!(out, "{}\t{}\t{}", info.id, info.mime_type, info.name)?;
            }
        }
        Command::Share { path, role, email } => {
            let permission = match email {
                Some(email) => Permission::user(role, email),
                None => Permission::anyone(role),
            };
            println!("{}", fs.share(&path, &permission)?);
        }
        Command::Url { path } => println!("{}", fs.url(&path)?),
        Command::Help => print_help(),
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging; stdout carries file content
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let (target, command) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let fs = match open_fs(target) {
        Ok(fs) => fs,
        Err(e) => {
            error!(error = %e, "Failed to open filesystem");
            return Err(e);
        }
    };

    let result = run(&fs, command);
    fs.cache().log_metrics();
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}
