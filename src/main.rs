//! lscpack - Columnar log compression with selective queries
//!
//! Thin command-line shim over the library: reads bytes, feeds the engine,
//! writes bytes. All logic lives in the library crate.

use lscpack::{Compressor, Container, Decompressor, Predicate};

use std::env;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        usage(&args.first().map(|s| s.as_str()).unwrap_or("lscpack"));
        std::process::exit(1);
    }

    let mode = args[1].as_str();
    let start = Instant::now();

    let result = match mode {
        "compress" | "c" => compress(&args[2], args.get(3).map(|s| s.as_str()).unwrap_or("-")),
        "decompress" | "d" => decompress(&args[2], args.get(3).map(|s| s.as_str()).unwrap_or("-")),
        "count" => count(&args[2]),
        "query" | "q" => query(&args[2], &args[3..]),
        _ => {
            eprintln!("Unknown mode: {}. Use compress, decompress, count or query", mode);
            std::process::exit(1);
        }
    };

    match result {
        Ok(()) => eprintln!("Done in {:.2}s", start.elapsed().as_secs_f64()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn usage(prog: &str) {
    eprintln!("lscpack - columnar log compression");
    eprintln!("Usage:");
    eprintln!("  {} compress <input> [output]", prog);
    eprintln!("  {} decompress <input> [output]", prog);
    eprintln!("  {} count <input>", prog);
    eprintln!(
        "  {} query <input> [--severity S[,S...]] [--ipv4 A] [--after MS] [--before MS] [--limit N]",
        prog
    );
    eprintln!();
    eprintln!("Use '-' for stdin/stdout.");
}

fn read_input(path: &str) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if path == "-" {
        io::stdin().read_to_end(&mut buf)?;
    } else {
        BufReader::new(File::open(path)?).read_to_end(&mut buf)?;
    }
    Ok(buf)
}

fn open_output(path: &str) -> io::Result<Box<dyn Write>> {
    Ok(if path == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(BufWriter::new(File::create(path)?))
    })
}

fn compress(input: &str, output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_input(input)?;
    let (bytes, stats) = Compressor::default().compress_text(&data)?;
    let mut out = open_output(output)?;
    out.write_all(&bytes)?;
    out.flush()?;
    eprintln!(
        "Compressed {} lines, {} -> {} bytes ({:.1}x), {} templates",
        stats.n_lines,
        stats.input_bytes,
        stats.output_bytes,
        stats.ratio(),
        stats.n_templates
    );
    Ok(())
}

fn decompress(input: &str, output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_input(input)?;
    let text = Decompressor::new(&data)?.text()?;
    let mut out = open_output(output)?;
    out.write_all(&text)?;
    out.flush()?;
    Ok(())
}

fn count(input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_input(input)?;
    let container = Container::open(&data)?;
    println!("{}", container.count());
    Ok(())
}

fn query(input: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut pred = Predicate::new();
    let mut limit: Option<usize> = None;

    let mut i = 0;
    while i < args.len() {
        let need_value = |i: usize| -> Result<&str, Box<dyn std::error::Error>> {
            args.get(i + 1)
                .map(|s| s.as_str())
                .ok_or_else(|| format!("{} needs a value", args[i]).into())
        };
        match args[i].as_str() {
            "--severity" => {
                pred = pred.severity(need_value(i)?.split(','));
                i += 2;
            }
            "--ipv4" => {
                pred = pred.ipv4(need_value(i)?);
                i += 2;
            }
            "--after" => {
                pred = pred.ts_after(need_value(i)?.parse()?);
                i += 2;
            }
            "--before" => {
                pred = pred.ts_before(need_value(i)?.parse()?);
                i += 2;
            }
            "--limit" => {
                limit = Some(need_value(i)?.parse()?);
                i += 2;
            }
            other => return Err(format!("unknown flag {}", other).into()),
        }
    }

    let data = read_input(input)?;
    let container = Container::open(&data)?;
    let result = container.filter(&pred, limit)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for m in &result.matches {
        out.write_all(&m.text)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    for (t, e) in &result.unreadable {
        eprintln!("warning: template {} unreadable: {}", t, e);
    }
    eprintln!("{} matches", result.matches.len());
    Ok(())
}
