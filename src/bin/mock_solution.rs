//! Scripted stand-in for an external solution, used by the integration
//! tests. It attaches to the judge's two pipe paths with plain file
//! opens, the way any real program would, plays a deliberately boring
//! legal strategy (always the topmost cell of the rightmost non-empty
//! column),
//! and sends the end-match `0` once it has finished the requested number
//! of games.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};

fn main() {
    let mut args = std::env::args().skip(1);
    let usage = "usage: mock-solution <read-path> <write-path> [games]";
    let read_path = args.next().expect(usage);
    let write_path = args.next().expect(usage);
    let target_games: u32 = args
        .next()
        .map(|v| v.parse().expect("games must be an integer"))
        .unwrap_or(1);

    let input = File::open(&read_path).expect("cannot open the judge's output pipe");
    let output = OpenOptions::new()
        .write(true)
        .open(&write_path)
        .expect("cannot open the judge's input pipe");
    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);

    let mode = read_line(&mut reader);
    assert_eq!(mode.trim(), "1", "unexpected mode tag");
    let params = read_line(&mut reader);
    let mut it = params.split_whitespace();
    let n: usize = it.next().unwrap().parse().unwrap();
    let _secret = read_line(&mut reader);

    let mut heights = vec![n; n];
    let mut my_first = true;
    let mut games = 0u32;
    loop {
        let mut my_move = my_first;
        let mut moved_this_game = false;
        while heights[0] > 0 {
            let (x, y) = if my_move {
                if !moved_this_game && games >= target_games {
                    writeln!(writer, "0").unwrap();
                    writer.flush().unwrap();
                    return;
                }
                let mv = pick(&heights);
                writeln!(writer, "{} {}", mv.0, mv.1).unwrap();
                writer.flush().unwrap();
                moved_this_game = true;
                mv
            } else {
                let line = read_line(&mut reader);
                let mut parts = line.split_whitespace();
                let x: usize = parts.next().unwrap().parse().unwrap();
                let y: usize = parts.next().unwrap().parse().unwrap();
                (x, y)
            };
            apply(&mut heights, x, y);
            my_move = !my_move;
        }
        games += 1;
        heights = vec![n; n];
        my_first = !my_first;
    }
}

fn read_line(reader: &mut impl BufRead) -> String {
    let mut line = String::new();
    let read = reader.read_line(&mut line).expect("pipe read failed");
    assert!(read > 0, "judge closed the pipe early");
    line.trim_end().to_string()
}

/// Topmost cell of the rightmost non-empty column, 1-based: always legal
/// and erases exactly one cell.
fn pick(heights: &[usize]) -> (usize, usize) {
    let x = heights
        .iter()
        .rposition(|&h| h > 0)
        .expect("no cells left to play");
    (x + 1, heights[x])
}

fn apply(heights: &mut [usize], x: usize, y: usize) {
    for h in &mut heights[x - 1..] {
        *h = (*h).min(y - 1);
    }
}
