use std::env;

use asm24::assembler;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <source> [<source> ...] - base names of .as files, without the extension",
            args[0]
        );
        std::process::exit(1);
    }

    assembler::assemble(&args[1..]);
}
