//! Kernel Frontend CLI
//!
//! カーネルソースのマクロを展開して出力する

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser as ClapParser;
use kernel_frontend::{init_logging, PPConfig, Preprocessor};

/// コマンドライン引数
#[derive(ClapParser)]
#[command(name = "kernel-frontend")]
#[command(version, about = "Kernel source macro expander")]
struct Cli {
    /// 入力ファイル
    input: PathBuf,

    /// マクロ定義 (-D NAME[=VALUE])
    #[arg(short = 'D', long = "define")]
    define: Vec<String>,

    /// 出力ファイル（省略時は標準出力）
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// 処理後のマクロテーブルをJSONで出力
    #[arg(long = "dump-macros")]
    dump_macros: bool,

    /// プリプロセッサデバッグ出力
    #[arg(long = "debug-pp")]
    debug_pp: bool,

    /// 不正な #define を警告してスキップ
    #[arg(long = "skip-invalid-defines")]
    skip_invalid_defines: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.debug_pp);

    let config = PPConfig {
        predefined: parse_defines(&cli.define),
        debug_pp: cli.debug_pp,
        skip_invalid_defines: cli.skip_invalid_defines,
    };
    let mut pp = Preprocessor::new(config);
    let expanded = pp.process_file(&cli.input)?;

    let mut writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    if cli.dump_macros {
        let defs = pp.macros().definitions();
        serde_json::to_writer_pretty(&mut writer, &defs)?;
        writeln!(writer)?;
    } else {
        writer.write_all(expanded.as_bytes())?;
        if !expanded.ends_with('\n') {
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// -D オプションを (名前, 値) に分解
fn parse_defines(defines: &[String]) -> Vec<(String, Option<String>)> {
    defines
        .iter()
        .map(|s| {
            if let Some(pos) = s.find('=') {
                let (name, value) = s.split_at(pos);
                (name.to_string(), Some(value[1..].to_string()))
            } else {
                (s.clone(), None)
            }
        })
        .collect()
}
