use std::fs;
use std::process::exit;

use crossfill::{Crossword, Solver};

fn load_words(path: &str) -> Vec<String> {
    fs::read_to_string(path)
        .expect("Something went wrong reading the words file")
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                None
            } else {
                Some(line.to_lowercase())
            }
        })
        .collect()
}

fn main() {
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("Failed to initialize logging");

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <structure-file> <words-file>", args[0]);
        exit(2);
    }

    let template =
        fs::read_to_string(&args[1]).expect("Something went wrong reading the structure file");
    let words = load_words(&args[2]);

    let crossword = Crossword::from_template(&template, &words).expect("Invalid puzzle input");
    let mut solver = Solver::new(&crossword);

    match solver.solve() {
        None => println!("No solution."),
        Some(assignment) => {
            let letters = solver.letter_grid(&assignment);
            for (row, line) in letters.iter().enumerate() {
                let rendered: String = line
                    .iter()
                    .enumerate()
                    .map(|(col, letter)| {
                        if crossword.is_open(row, col) {
                            letter.unwrap_or(' ')
                        } else {
                            '█'
                        }
                    })
                    .collect();
                println!("{}", rendered);
            }
        }
    }

    println!("{:?}", solver.statistics());
}
