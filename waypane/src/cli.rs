pub struct Cli {
    pub title: String,
    pub quiet: bool,
}

impl Cli {
    pub fn new() -> Self {
        let mut title = "waypane".to_string();
        let mut quiet = false;
        let mut args = std::env::args();
        args.next(); // skip the binary name

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-t" | "--title" => {
                    title = match args.next() {
                        Some(t) => t,
                        None => {
                            eprintln!("expected argument for option `--title`");
                            std::process::exit(-2);
                        }
                    }
                }
                "-q" | "--quiet" => quiet = true,
                "-h" | "--help" => {
                    println!(
                        "\
waypane: open a bare shared-memory window on a wayland compositor

Options:

    -t|--title <title>
        Set the window title. Defaults to `waypane`.

    -q|--quiet    will only log errors
    -h|--help     print help
    -V|--version  print version"
                    );
                    std::process::exit(0);
                }
                "-V" | "--version" => {
                    println!("waypane {}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                s => {
                    eprintln!("Unrecognized command line argument: {s}");
                    eprintln!("Run -h|--help to know what arguments are recognized!");
                    std::process::exit(-1);
                }
            }
        }

        Self { title, quiet }
    }
}
