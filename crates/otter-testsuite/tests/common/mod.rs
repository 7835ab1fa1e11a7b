//! Fake engine binaries for integration tests.
//!
//! The scripts react to marker words in the source they are given:
//! `SYNTAX_ERROR` fails compilation, `THROW` fails execution,
//! `STRICT_THROW` fails only the strict variant and `HANG` sleeps past
//! any reasonable timeout. `NEEDS_UNSANITIZED` makes `hvm` fail unless
//! the handle sanitizer is disabled.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use otter_testsuite::{ExecMode, ExecOptions, ExtraArgs};

const RUNTIME_CHECKS: &str = r#"
check_runtime() {
  if grep -qw HANG "$1"; then sleep 5; fi
  if grep -qw CHECK_ENV "$1" && [ "$LC_ALL" != "en_US.UTF-8" ]; then
    echo "bad locale" >&2
    exit 1
  fi
  if head -n 1 "$1" | grep -q "use strict" && grep -qw STRICT_THROW "$1"; then
    echo "Uncaught TypeError: strict" >&2
    exit 1
  fi
  if grep -qw THROW "$1"; then
    echo "Uncaught Error: thrown" >&2
    exit 1
  fi
}
"#;

const HERMES: &str = r#"
src=""
out=""
dump=""
for arg in "$@"; do
  if [ "$arg" = "--version" ]; then
    printf 'Fake Hermes\n  Features:\n    Atomics\n    Zip file input\n'
    exit 0
  fi
done
while [ $# -gt 0 ]; do
  case "$1" in
    -out|-o) out="$2"; shift 2 ;;
    -dump-ast) dump=plain; shift ;;
    -dump-transformed-ast) dump=transformed; shift ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
if grep -q 'print(source);' "$src"; then
  sed -n 's/^var source = "\(.*\)";$/\1/p' "$src"
  exit 0
fi
if grep -qw SYNTAX_ERROR "$src"; then
  echo "SyntaxError: unexpected token" >&2
  exit 1
fi
if [ "$dump" = transformed ] && grep -qw SEMANTIC_ERROR "$src"; then
  echo "error: invalid assignment target" >&2
  exit 1
fi
if [ -n "$dump" ]; then
  if grep -qw IDENTIFIER "$src"; then
    printf '{"type":"File","program":{"type":"Program","body":[{"type":"ExpressionStatement","expression":{"type":"Identifier","name":"x","typeAnnotation":null},"directive":null}]}}\n'
  else
    printf '{"type":"File","program":{"type":"Program","body":[]}}\n'
  fi
  exit 0
fi
if [ -n "$out" ]; then
  cp "$src" "$out"
  exit 0
fi
check_runtime "$src"
exit 0
"#;

const HVM: &str = r#"
if grep -qw NEEDS_UNSANITIZED "$1"; then
  case " $* " in
    *" -gc-sanitize-handles=0 "*) ;;
    *) echo "handle sanitizer tripped" >&2; exit 1 ;;
  esac
fi
check_runtime "$1"
exit 0
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{RUNTIME_CHECKS}\n{body}")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Directory holding `hermes`, `hvm` and `shermes`, created once per test
/// binary so no script is still open for writing while tests spawn them.
pub fn engine_dir() -> &'static Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("otter-testsuite-engines-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_script(&dir.join("hermes"), HERMES);
        write_script(&dir.join("shermes"), HERMES);
        write_script(&dir.join("hvm"), HVM);
        dir
    })
}

pub fn exec_options(mode: ExecMode) -> ExecOptions {
    ExecOptions {
        binary_dir: engine_dir().to_path_buf(),
        mode,
        optimize: false,
        extra_args: ExtraArgs::default(),
        timeout: Duration::from_secs(10),
        disable_handle_san: false,
    }
}

/// Write `content` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}
