/// Language recipe book
///
/// One immutable row per `Language`: base image, compile command, run
/// command and compile timeout. Commands are recipe text only; submission
/// source never ends up in a shell string, it is copied into the program
/// volume at `SOURCE_PATH` instead.
use crate::types::Language;

/// 1 "MB" of container memory
pub const MEMORY_MB: u64 = 1024 * 1024;
/// 1 "GB" of container memory
pub const MEMORY_GB: u64 = 1024 * MEMORY_MB;

/// Mount point of the program volume
pub const PROGRAM_DIR: &str = "/sandbox";
/// Where the submitted source lands inside the program volume
pub const SOURCE_PATH: &str = "/sandbox/code";
/// Mount point of a per-run stdin volume
pub const STDIN_DIR: &str = "/stdin";
/// Where the testcase input lands inside the stdin volume
pub const STDIN_PATH: &str = "/stdin/input";

/// Ceiling for the compile step (compilation is not graded)
pub const COMPILE_MEMORY_LIMIT: u64 = 512 * MEMORY_MB;
/// Ceiling for staging containers that only copy files
pub const STAGING_MEMORY_LIMIT: u64 = 128 * MEMORY_MB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageRecipe {
    pub language: Language,
    pub image: &'static str,
    pub compile_cmd: &'static str,
    pub run_cmd: &'static str,
    pub compile_timeout_ms: u64,
}

pub static RECIPES: &[LanguageRecipe] = &[
    LanguageRecipe {
        language: Language::Python,
        image: "docker.io/library/python:3.10",
        compile_cmd: "cp /sandbox/code /sandbox/code.py && python3 -m py_compile /sandbox/code.py",
        run_cmd: "python3 /sandbox/code.py < /stdin/input",
        compile_timeout_ms: 10_000,
    },
    LanguageRecipe {
        language: Language::Go,
        image: "docker.io/library/golang:1.21",
        compile_cmd: "cd /sandbox && cp /sandbox/code /sandbox/main.go && (go mod init sandbox > /dev/null 2>&1) && go build -o /sandbox/main",
        run_cmd: "/sandbox/main < /stdin/input",
        compile_timeout_ms: 60_000,
    },
    LanguageRecipe {
        language: Language::C,
        image: "docker.io/library/gcc:12.3.0",
        compile_cmd: "cp /sandbox/code /sandbox/main.c && gcc -O2 -o /sandbox/main /sandbox/main.c -lm",
        run_cmd: "/sandbox/main < /stdin/input",
        compile_timeout_ms: 30_000,
    },
    LanguageRecipe {
        language: Language::Cpp,
        image: "docker.io/library/gcc:12.3.0",
        compile_cmd: "cp /sandbox/code /sandbox/main.cpp && g++ -O2 -std=c++17 -o /sandbox/main /sandbox/main.cpp",
        run_cmd: "/sandbox/main < /stdin/input",
        compile_timeout_ms: 30_000,
    },
    LanguageRecipe {
        language: Language::Rust,
        image: "docker.io/library/rust:1.75-slim",
        compile_cmd: "cp /sandbox/code /sandbox/main.rs && rustc -O -o /sandbox/main /sandbox/main.rs",
        run_cmd: "/sandbox/main < /stdin/input",
        compile_timeout_ms: 60_000,
    },
];

impl Language {
    pub fn recipe(self) -> Option<&'static LanguageRecipe> {
        RECIPES.iter().find(|recipe| recipe.language == self)
    }
}

/// Resolve a recipe from a language id as stored on a submission.
/// `None` means "language not supported"; so does a row with no image.
pub fn recipe_for(language: &str) -> Option<&'static LanguageRecipe> {
    language
        .parse::<Language>()
        .ok()
        .and_then(Language::recipe)
        .filter(|recipe| !recipe.image.is_empty())
}

/// Wrap recipe text into an entrypoint
pub fn shell_command(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}
