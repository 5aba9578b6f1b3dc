//! Interactive shell over an rtree-store index.
//!
//! Commands map 1:1 to the public API. Working files live under a
//! caller-supplied directory (first argument, default `saved_data/`).
//! Exits 0 on a clean quit, 1 on a fatal error.

use rtree_store::{RTree, RTreeConfig, RTreeResult, Record};
use std::io::{BufRead, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let working_dir = std::env::args().nth(1).unwrap_or_else(|| "saved_data".into());
    let dimensions = std::env::args()
        .nth(2)
        .and_then(|arg| arg.parse::<u32>().ok())
        .unwrap_or(2);

    let config = RTreeConfig::new(&working_dir).dimensions(dimensions);
    let tree = match RTree::open(config) {
        Ok(tree) => tree,
        Err(err) => {
            eprintln!("cannot open index in '{working_dir}': {err}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "opened index in '{}' ({} dimensions, depth {})",
        working_dir,
        tree.dimensions(),
        tree.tree_depth()
    );

    match run(&tree) {
        Ok(()) => match tree.close() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("close failed: {err}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            eprintln!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(tree: &RTree) -> RTreeResult<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print_menu();
        let Some(line) = next_line(&mut lines)? else {
            return Ok(());
        };

        match line.trim() {
            "1" | "a" => insert(tree, &mut lines)?,
            "2" | "d" => delete(tree, &mut lines)?,
            "3" | "sp" => search_point(tree, &mut lines)?,
            "4" | "sr" => search_window(tree, &mut lines)?,
            "5" | "sn" => search_knn(tree, &mut lines)?,
            "6" | "rt" => {
                tree.rebuild()?;
                println!("index rebuilt");
            }
            "7" | "st" => {
                let stats = tree.stats();
                println!("{stats:#?}");
            }
            "!" | "q" | "exit" => return Ok(()),
            "" => {}
            other => println!("unrecognized input '{other}', try again"),
        }
    }
}

fn print_menu() {
    println!(
        "\n1> Insert point\n\
         2> Delete point\n\
         3> Search point\n\
         4> Search range\n\
         5> Search nearest neighbours\n\
         6> Rebuild index\n\
         7> Statistics\n\
         !> Exit"
    );
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn insert(tree: &RTree, lines: &mut impl Iterator<Item = std::io::Result<String>>) -> RTreeResult<()> {
    let Some(point) = read_point(tree, lines, "point")? else {
        return Ok(());
    };
    println!("payload:");
    let Some(payload) = next_line(lines)? else {
        return Ok(());
    };
    tree.insert(&point, payload.as_bytes())?;
    println!("inserted {point:?}");
    Ok(())
}

fn delete(tree: &RTree, lines: &mut impl Iterator<Item = std::io::Result<String>>) -> RTreeResult<()> {
    let Some(point) = read_point(tree, lines, "point")? else {
        return Ok(());
    };
    if tree.delete(&point)? {
        println!("deleted one record at {point:?}");
    } else {
        println!("nothing stored at {point:?}");
    }
    Ok(())
}

fn search_point(
    tree: &RTree,
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> RTreeResult<()> {
    let Some(point) = read_point(tree, lines, "point")? else {
        return Ok(());
    };
    match tree.search_point(&point)? {
        Some(record) => print_record(&record),
        None => println!("not found"),
    }
    Ok(())
}

fn search_window(
    tree: &RTree,
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> RTreeResult<()> {
    let Some(low) = read_point(tree, lines, "first corner")? else {
        return Ok(());
    };
    let Some(high) = read_point(tree, lines, "second corner")? else {
        return Ok(());
    };
    let matches = tree.search_window(&low, &high)?;
    for record in &matches {
        print_record(record);
    }
    println!("{} record(s)", matches.len());
    Ok(())
}

fn search_knn(
    tree: &RTree,
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> RTreeResult<()> {
    println!("k:");
    let Some(line) = next_line(lines)? else {
        return Ok(());
    };
    let Ok(k) = line.trim().parse::<usize>() else {
        println!("not a number, try again");
        return Ok(());
    };
    let Some(point) = read_point(tree, lines, "query point")? else {
        return Ok(());
    };
    for record in tree.search_knn(k, &point)? {
        println!(
            "{:?} {} (distance {:.3})",
            record.coordinates,
            String::from_utf8_lossy(&record.payload),
            record.distance_to(&point)
        );
    }
    Ok(())
}

/// Prompts for one whitespace-separated coordinate tuple. `None` on EOF.
fn read_point(
    tree: &RTree,
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
    what: &str,
) -> RTreeResult<Option<Vec<i64>>> {
    loop {
        println!("{what} ({} integers):", tree.dimensions());
        let Some(line) = next_line(lines)? else {
            return Ok(None);
        };
        let parsed: Result<Vec<i64>, _> =
            line.split_whitespace().map(str::parse::<i64>).collect();
        match parsed {
            Ok(point) if point.len() == tree.dimensions() as usize => return Ok(Some(point)),
            _ => println!("try again"),
        }
    }
}

fn next_line(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> RTreeResult<Option<String>> {
    match lines.next() {
        Some(line) => Ok(Some(line?)),
        None => Ok(None),
    }
}

fn print_record(record: &Record) {
    println!(
        "{:?} {}",
        record.coordinates,
        String::from_utf8_lossy(&record.payload)
    );
}
