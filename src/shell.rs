//! Line-oriented front end for the navigator
//!
//! Parses one command per line, runs it against a [`Navigator`] and renders
//! the result as plain text. Entry arguments are archive paths from the root
//! of the active archive; folders on the way are expanded as needed.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};
use crate::state::credentials::{PasswordPrompt, PromptRequest};
use crate::state::{Navigator, Outcome};
use crate::tree::{EntryKind, EntryTree, NodeId};

/// Typing this at a password prompt cancels it
pub const CANCEL_WORD: &str = ":cancel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(PathBuf),
    /// List children of a folder (root when absent)
    Ls(Option<String>),
    Tree,
    Expand(String),
    /// Open an entry: expand, enter nested archive or extract file
    Enter(String),
    Back,
    Rm(String),
    Mkdir(String),
    Add { files: Vec<PathBuf>, dest: Option<String> },
    Extract(PathBuf),
    Meta,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let words = split_words(line)?;
        let Some((name, args)) = words.split_first() else {
            return Ok(None);
        };

        let one = |usage: &str| -> Result<String, String> {
            match args {
                [arg] => Ok(arg.clone()),
                _ => Err(format!("usage: {}", usage)),
            }
        };
        let none = |cmd: Command| -> Result<Command, String> {
            if args.is_empty() {
                Ok(cmd)
            } else {
                Err(format!("{} takes no arguments", name))
            }
        };

        let cmd = match name.as_str() {
            "open" | "o" => Command::Open(one("open <archive>")?.into()),
            "ls" => match args {
                [] => Command::Ls(None),
                [path] => Command::Ls(Some(path.clone())),
                _ => return Err("usage: ls [path]".to_string()),
            },
            "tree" => none(Command::Tree)?,
            "expand" | "x" => Command::Expand(one("expand <folder>")?),
            "enter" | "cd" => Command::Enter(one("enter <entry>")?),
            "back" | ".." => none(Command::Back)?,
            "rm" => Command::Rm(one("rm <entry>")?),
            "mkdir" => Command::Mkdir(one("mkdir <path>")?),
            "add" => {
                let (files, dest) = match args.iter().position(|a| a == "--to") {
                    Some(i) => match &args[i + 1..] {
                        [dest] => (&args[..i], Some(dest.clone())),
                        _ => return Err("usage: add <file>... [--to <folder>]".to_string()),
                    },
                    None => (args, None),
                };
                if files.is_empty() {
                    return Err("usage: add <file>... [--to <folder>]".to_string());
                }
                Command::Add {
                    files: files.iter().map(PathBuf::from).collect(),
                    dest,
                }
            }
            "extract" => Command::Extract(one("extract <directory>")?.into()),
            "meta" => none(Command::Meta)?,
            "status" => none(Command::Status)?,
            "help" | "?" => none(Command::Help)?,
            "quit" | "exit" | "q" => none(Command::Quit)?,
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(Some(cmd))
    }
}

/// Split on whitespace, honoring double quotes
fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut has_word = false;
    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_word {
                    words.push(std::mem::take(&mut cur));
                    has_word = false;
                }
            }
            c => {
                cur.push(c);
                has_word = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if has_word {
        words.push(cur);
    }
    Ok(words)
}

pub fn help_text() -> &'static str {
    "\
Commands:
  open <archive>              open an archive file
  ls [path]                   list a folder (root by default)
  tree                        show everything disclosed so far
  expand <folder>             load a folder's children
  enter <entry>               expand a folder, enter a nested archive or extract a file
  back                        return to the enclosing archive
  rm <entry>                  remove a file or folder from the archive
  mkdir <path>                create an empty folder
  add <file>... [--to <dir>]  add local files
  extract <directory>         extract the whole archive
  meta                        show the archive manifest
  status                      show where you are
  help                        this text
  quit                        leave
At a password prompt, an empty line tries no password and :cancel gives up."
}

/// One-line rendering of a node
fn label(tree: &EntryTree, id: NodeId) -> String {
    let Ok(node) = tree.get(id) else {
        return String::new();
    };
    match node.kind {
        EntryKind::Folder if node.children_populated => format!("{}/", node.name),
        EntryKind::Folder => format!("{}/ ...", node.name),
        EntryKind::NestedArchive => format!("{} [archive]", node.name),
        EntryKind::File => node.name.clone(),
    }
}

pub fn render_children(tree: &EntryTree, id: NodeId) -> String {
    tree.children(id)
        .map(|children| children.iter().map(|c| label(tree, *c)).collect::<Vec<_>>().join("\n"))
        .unwrap_or_default()
}

pub fn render_tree(tree: &EntryTree) -> String {
    tree.descendants(tree.root())
        .into_iter()
        .map(|(depth, id)| format!("{}{}", "  ".repeat(depth), label(tree, id)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find a node by archive path, expanding folders along the way
pub fn locate(nav: &mut Navigator, path: &str) -> AppResult<NodeId> {
    let mut cur = nav.tree().root();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let mut next = nav.tree().find_by_path(segment, Some(cur));
        if next.is_none() && !nav.tree().get(cur)?.children_populated {
            nav.expand(cur)?;
            next = nav.tree().find_by_path(segment, Some(cur));
        }
        cur = next.ok_or_else(|| AppError::InvalidTarget(format!("no entry '{}'", path)))?;
    }
    Ok(cur)
}

/// Reads passwords from standard input
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl PasswordPrompt for StdinPrompt {
    fn request_password(&mut self, request: &PromptRequest) -> Option<String> {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{} ({} cancels): ", request.message(), CANCEL_WORD);
        let _ = stderr.flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let pw = line.trim_end_matches(['\r', '\n']);
                if pw == CANCEL_WORD { None } else { Some(pw.to_string()) }
            }
        }
    }
}

/// Run one command. Returns `false` when the shell should exit.
pub fn execute(
    nav: &mut Navigator,
    cmd: Command,
    prompt: &mut dyn PasswordPrompt,
    out: &mut dyn Write,
) -> AppResult<bool> {
    match cmd {
        Command::Open(path) => {
            let outcome = nav.open_archive(&path, prompt)?;
            report(nav, &outcome, out)?;
        }
        Command::Ls(path) => {
            let id = match path {
                Some(p) => locate(nav, &p)?,
                None => nav.tree().root(),
            };
            nav.expand(id)?;
            writeln!(out, "{}", render_children(nav.tree(), id))?;
        }
        Command::Tree => writeln!(out, "{}", render_tree(nav.tree()))?,
        Command::Expand(path) => {
            let id = locate(nav, &path)?;
            nav.expand(id)?;
            writeln!(out, "{}", render_children(nav.tree(), id))?;
        }
        Command::Enter(path) => {
            let id = locate(nav, &path)?;
            let outcome = nav.open_entry(id, prompt)?;
            match &outcome {
                Outcome::Done | Outcome::Unchanged if nav.tree().contains(id) => {
                    writeln!(out, "{}", render_children(nav.tree(), id))?;
                }
                _ => report(nav, &outcome, out)?,
            }
        }
        Command::Back => {
            let outcome = nav.leave_nested(prompt)?;
            if outcome == Outcome::Unchanged {
                writeln!(out, "Already at the outermost archive")?;
            } else {
                report(nav, &outcome, out)?;
            }
        }
        Command::Rm(path) => {
            let id = locate(nav, &path)?;
            nav.remove(id)?;
            writeln!(out, "Removed {}", path)?;
        }
        Command::Mkdir(path) => {
            let (parent, name) = match path.trim_end_matches('/').rsplit_once('/') {
                Some((parent, name)) => (locate(nav, parent)?, name.to_string()),
                None => (nav.tree().root(), path.trim_end_matches('/').to_string()),
            };
            let id = nav.add_folder(parent, &name)?;
            writeln!(out, "Created {}/", nav.tree().path_for(id)?)?;
        }
        Command::Add { files, dest } => {
            let target = match dest {
                Some(d) => Some(locate(nav, &d)?),
                None => None,
            };
            nav.add_files(&files, target)?;
            writeln!(out, "Added {} file(s)", files.len())?;
        }
        Command::Extract(dest) => {
            nav.extract_all(&dest)?;
            writeln!(out, "Extracted to {}", dest.display())?;
        }
        Command::Meta => match nav.manifest() {
            Some(manifest) => writeln!(out, "{}", manifest.summary())?,
            None => return Err(AppError::NoArchive),
        },
        Command::Status => {
            if nav.active_archive().is_none() {
                writeln!(out, "No archive open")?;
            } else {
                writeln!(out, "{}", nav.status_line())?;
                if let Some(info) = nav.backend_info() {
                    writeln!(out, "Backend: {} ({})", info.name, info.description)?;
                }
            }
        }
        Command::Help => writeln!(out, "{}", help_text())?,
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn report(nav: &Navigator, outcome: &Outcome, out: &mut dyn Write) -> io::Result<()> {
    match outcome {
        Outcome::Cancelled => writeln!(out, "Cancelled"),
        Outcome::Extracted(path) => writeln!(out, "Extracted to {}", path.display()),
        Outcome::Done | Outcome::Unchanged => {
            writeln!(out, "{}", nav.status_line())?;
            writeln!(out, "{}", render_children(nav.tree(), nav.tree().root()))
        }
    }
}
