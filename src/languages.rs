//! The fixed set of supported languages and how each is built and launched

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A supported submission language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "C++")]
    Cpp,
    Python,
    Java,
}

/// Program and argument vector for starting a built submission
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Language {
    /// Name of the source file inside a workspace (e.g. "main.cpp")
    pub fn source_file(&self) -> &'static str {
        match self {
            Language::Cpp => "main.cpp",
            Language::Python => "main.py",
            Language::Java => "Main.java",
        }
    }

    /// Compile command run inside the workspace directory, or `None` for
    /// interpreted languages
    pub fn compile_command(&self) -> Option<Vec<String>> {
        let cmd = match self {
            Language::Cpp => "g++ main.cpp -o main -std=c++17 -O2",
            Language::Java => "javac Main.java",
            Language::Python => return None,
        };
        Some(into_command(cmd))
    }

    /// Path of the artifact the runner is pointed at.
    ///
    /// For Java this is the class path directory, for Python the script.
    pub fn executable(&self, dir: &Path) -> PathBuf {
        match self {
            Language::Cpp => dir.join("main"),
            Language::Python => dir.join(self.source_file()),
            Language::Java => dir.to_path_buf(),
        }
    }

    /// File whose existence proves that compilation produced something runnable
    pub fn artifact(&self, dir: &Path) -> PathBuf {
        match self {
            Language::Java => dir.join("Main.class"),
            _ => self.executable(dir),
        }
    }

    /// How to start the built program
    pub fn entry_point(&self, executable: &Path) -> EntryPoint {
        match self {
            Language::Cpp => EntryPoint {
                program: executable.to_path_buf(),
                args: Vec::new(),
            },
            Language::Python => EntryPoint {
                program: PathBuf::from("python3"),
                args: vec![executable.to_string_lossy().into_owned()],
            },
            Language::Java => EntryPoint {
                program: PathBuf::from("java"),
                args: vec![
                    "-cp".to_string(),
                    executable.to_string_lossy().into_owned(),
                    "Main".to_string(),
                ],
            },
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Cpp => "C++",
            Language::Python => "Python",
            Language::Java => "Java",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c++" | "cpp" | "cc" => Ok(Language::Cpp),
            "python" | "python3" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
