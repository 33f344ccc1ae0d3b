use std::error::Error;
use std::os::unix::fs::PermissionsExt;
use std::{env, fs, path, process};

extern crate serde;
extern crate serde_json;

extern crate prettytable;

extern crate clap;
use clap::{Parser, Subcommand};

type XResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workspace unit tests with coverage and print a summary
    Testall {
        #[clap(last = true)]
        args: Vec<String>,
    },
}

#[derive(serde::Deserialize, Debug)]
struct CompilerMessage {
    reason: String,
    executable: Option<String>,
    target: Option<Target>,
}

#[derive(serde::Deserialize, Debug)]
struct Target {
    name: String,
}

#[derive(serde::Deserialize, Debug)]
struct Coverage {
    data: Vec<CoverageData>,
}

#[derive(serde::Deserialize, Debug)]
struct CoverageData {
    files: Vec<CoverageFile>,
}

#[derive(serde::Deserialize, Debug)]
struct CoverageFile {
    filename: String,
    summary: CoverageSummary,
}

#[derive(serde::Deserialize, Debug)]
struct CoverageSummary {
    regions: CoverageSummaryItem,
    functions: CoverageSummaryItem,
    lines: CoverageSummaryItem,
}

#[derive(serde::Deserialize, Debug)]
struct CoverageSummaryItem {
    count: u32,
    covered: u32,
    percent: f64,
}

const PROFDATA: &str = "vpe.profdata";

const IGNORE: [&str; 2] = [
    "--ignore-filename-regex=/.cargo/registry",
    "--ignore-filename-regex=/library/std/",
];

fn check(status: process::ExitStatus, cmd: &process::Command) -> XResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(format!("failed to execute: {:?}", cmd).into())
    }
}

fn profraw_files(cov_dir: &path::Path) -> XResult<Vec<path::PathBuf>> {
    Ok(cov_dir.read_dir()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |x| x == "profraw"))
        .collect())
}

fn clean(cov_dir: &path::Path) -> XResult<()> {
    if !cov_dir.exists() {
        fs::create_dir(cov_dir)?;
    }
    for p in profraw_files(cov_dir)? {
        fs::remove_file(p)?;
    }
    let profdata = cov_dir.join(PROFDATA);
    if profdata.exists() {
        fs::remove_file(profdata)?;
    }
    Ok(())
}

/// Builds the lib test binaries and returns (crate name, executable).
fn build_tests(args: &[String]) -> XResult<Vec<(String, String)>> {
    let mut args_all = vec![
        "test",
        "--workspace",
        "--no-run",
        "--message-format", "json",
    ];
    args_all.extend(args.iter().map(|s| &**s));

    let mut cargo = process::Command::new("cargo");
    cargo
        .args(args_all)
        .env("RUSTFLAGS", "-C instrument-coverage")
        .stdout(process::Stdio::piped());
    let mut child = cargo.spawn()?;

    let reader = child.stdout.take().ok_or("no stdout from cargo")?;
    let deserializer = serde_json::Deserializer::from_reader(reader);
    let mut test_progs = Vec::new();

    for msg in deserializer.into_iter::<CompilerMessage>() {
        let msg = msg?;
        if msg.reason != "compiler-artifact" {
            continue;
        }
        if let Some(exe) = msg.executable {
            let name = msg.target.map_or_else(|| String::from("????"), |t| t.name);
            test_progs.push((name, exe));
        }
    }

    check(child.wait()?, &cargo)?;
    Ok(test_progs)
}

fn llvm(cov_dir: &path::Path, tool: &str, args: Vec<String>) -> process::Command {
    let mut cargo = process::Command::new("cargo");
    cargo
        .current_dir(cov_dir)
        .arg(tool)
        .arg("--")
        .args(args);
    cargo
}

fn with_objects(mut args: Vec<String>, test_progs: &[(String, String)]) -> Vec<String> {
    for (_, prog) in test_progs {
        args.push("--object".into());
        args.push(prog.clone());
    }
    args
}

fn print_summary(cov: Coverage, rootdir: &str) {
    use prettytable::format::{
        FormatBuilder,
        LinePosition,
        LineSeparator,
    };
    use prettytable::{Row, Cell, color, Attr};

    let mut table = prettytable::Table::new();
    table.set_format(
        FormatBuilder::new()
            .separator(LinePosition::Title,  LineSeparator::new('-', '+', '+', '+'))
            .separator(LinePosition::Bottom, LineSeparator::new('-', '+', '+', '+'))
            .separator(LinePosition::Top,    LineSeparator::new('-', '+', '+', '+'))
            .padding(2, 2)
            .build());
    table.set_titles(Row::new(vec![
        Cell::new("Filename"),
        Cell::new("Regions"),
        Cell::new("Functions"),
        Cell::new("Lines"),
    ]));

    for data in cov.data {
        for file in data.files {
            let filename = file.filename.strip_prefix(rootdir)
                .map(String::from)
                .unwrap_or(file.filename.clone());

            let mut row = Row::empty();
            row.add_cell(Cell::new(filename.as_str()));

            for col in [file.summary.regions,
                        file.summary.functions,
                        file.summary.lines] {
                let text = format!("{:.2} ({}/{})", col.percent, col.covered, col.count);
                let c =
                    if col.covered == col.count {
                        color::GREEN
                    } else if col.percent >= 80. {
                        color::YELLOW
                    } else {
                        color::RED
                    };
                row.add_cell(Cell::new(text.as_str()).with_style(Attr::ForegroundColor(c)));
            }

            table.add_row(row);
        }
    }
    table.printstd();
}

fn fix_permission(p: &path::Path) {
    let mode = if p.is_dir() { 0o755 } else { 0o644 };
    let _ = fs::set_permissions(p, PermissionsExt::from_mode(mode));

    if let Ok(entries) = fs::read_dir(p).map(|r| r.filter_map(|e| e.ok())) {
        if p.is_dir() {
            for e in entries {
                fix_permission(&e.path());
            }
        }
    }
}

fn cargo_testall(args: &[String]) -> XResult<()> {
    let rootdir = env::current_dir()?;
    let cov_dir = rootdir.join("cov");
    clean(&cov_dir)?;

    let test_progs = build_tests(args)?;

    for (name, prog) in &test_progs {
        println!("**** {} ****", name);
        let mut cmd = process::Command::new(prog);
        cmd.env("LLVM_PROFILE_FILE", cov_dir.join("vpe-%m.profraw"));
        check(cmd.status()?, &cmd)?;
    }

    // merge profiles

    let mut merge: Vec<String> = ["merge", "--sparse", "-o", PROFDATA]
        .iter().map(|&s| s.into()).collect();
    for p in profraw_files(&cov_dir)? {
        merge.push(p.to_string_lossy().into_owned());
    }
    let mut cmd = llvm(&cov_dir, "profdata", merge);
    check(cmd.status()?, &cmd)?;

    // HTML report

    let mut show: Vec<String> = vec![
        "show".into(),
        format!("--instr-profile={}", PROFDATA),
        "--show-instantiations".into(),
        "--show-line-counts-or-regions".into(),
        "--Xdemangler=rustfilt".into(),
        "--format=html".into(),
        "--output-dir=.".into(),
    ];
    show.extend(IGNORE.iter().map(|&s| s.to_string()));
    let mut cmd = llvm(&cov_dir, "cov", with_objects(show, &test_progs));
    println!("Run: {:?}", cmd);
    check(cmd.status()?, &cmd)?;

    // summary

    let mut export: Vec<String> = vec![
        "export".into(),
        "--format=text".into(),
        format!("--instr-profile={}", PROFDATA),
    ];
    export.extend(IGNORE.iter().map(|&s| s.to_string()));
    let mut cmd = llvm(&cov_dir, "cov", with_objects(export, &test_progs));
    cmd.stdout(process::Stdio::piped());
    println!("Run: {:?}", cmd);
    let output = cmd.output()?;
    check(output.status, &cmd)?;

    let cov: Coverage = serde_json::from_slice(&output.stdout)?;
    print_summary(cov, &format!("{}/", rootdir.to_string_lossy()));

    fix_permission(&cov_dir);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let r = match &cli.command {
        Some(Commands::Testall { args }) => cargo_testall(args),
        None => Ok(()),
    };
    if let Err(e) = r {
        eprintln!("xtask: {}", e);
        process::exit(1);
    }
}
