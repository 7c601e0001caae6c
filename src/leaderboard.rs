//! README leaderboard built from per-unit `result.json` files

use crate::artifacts::RESULT_FILE;
use crate::error::EvalError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const README_TITLE: &str =
    "# KoCEM: A Multimodal Knowledge and Reasoning Benchmark for Korean Construction Engineering & Management";

const SECTION_HEADING: &str = "## Leaderboard";

/// Accuracy accumulated across splits, weighted by sample count
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubjectScore {
    pub acc_sum: f64,
    pub n: usize,
}

impl SubjectScore {
    pub fn acc(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.acc_sum / self.n as f64 }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelScores {
    pub subjects: BTreeMap<String, SubjectScore>,
}

impl ModelScores {
    /// Weighted accuracy over every subject
    pub fn overall(&self) -> f64 {
        let (sum, n) = self
            .subjects
            .values()
            .fold((0.0, 0), |(sum, n), s| (sum + s.acc_sum, n + s.n));
        if n == 0 { 0.0 } else { sum / n as f64 }
    }
}

/// locale -> model -> scores
pub type Leaderboard = BTreeMap<String, BTreeMap<String, ModelScores>>;

#[derive(Debug, Deserialize)]
struct ResultSummary {
    #[serde(default)]
    acc: f64,
    #[serde(default)]
    num_example: usize,
}

/// Locales with a prompt directory under `prompt_root`
pub fn prompt_locales(prompt_root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(prompt_root) else {
        return Vec::new();
    };
    let mut locales: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    locales.sort();
    locales
}

/// Collect `<base>/<locale>/<model>/<split>/<subject>/result.json` for the given locales
pub fn collect(base: &Path, locales: &[String]) -> Result<Leaderboard, EvalError> {
    let pattern = base.join("*/*/*/*").join(RESULT_FILE);
    let pattern = pattern.to_string_lossy();
    let paths = glob::glob(&pattern)
        .map_err(|e| EvalError::Configuration(format!("invalid results pattern {}: {}", pattern, e)))?;

    let mut board = Leaderboard::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable results path");
                continue;
            }
        };
        let Some((locale, model, subject)) = components(base, &path) else {
            continue;
        };
        if !locales.contains(&locale) {
            continue;
        }
        let summary: ResultSummary = match std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            Some(summary) => summary,
            None => {
                tracing::warn!(path = %path.display(), "skipping unreadable result");
                continue;
            }
        };

        let score = board
            .entry(locale)
            .or_default()
            .entry(model)
            .or_default()
            .subjects
            .entry(subject)
            .or_default();
        score.acc_sum += summary.acc * summary.num_example as f64;
        score.n += summary.num_example;
    }

    Ok(board)
}

/// (locale, model, subject) of a result path below `base`
fn components(base: &Path, path: &Path) -> Option<(String, String, String)> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    match parts.as_slice() {
        [locale, model, _split, subject, _file] => Some((locale.clone(), model.clone(), subject.clone())),
        _ => None,
    }
}

/// `## Leaderboard` section with one ranked HTML table per locale
pub fn render(board: &Leaderboard) -> String {
    let mut out = String::new();
    out.push_str(SECTION_HEADING);
    out.push_str("\n\n");
    out.push_str(
        "<p>Per-locale rankings aggregated across splits. Columns show subject accuracies. Higher is better.</p>\n\n",
    );

    for (locale, models) in board {
        if models.is_empty() {
            continue;
        }
        let _ = write!(out, "### Locale: {}\n\n", locale);

        let subjects: BTreeSet<&String> = models.values().flat_map(|m| m.subjects.keys()).collect();
        if subjects.is_empty() {
            out.push_str("<p><em>No results found.</em></p>\n\n");
            continue;
        }

        let mut ranked: Vec<(&String, &ModelScores)> = models.iter().collect();
        ranked.sort_by(|a, b| b.1.overall().total_cmp(&a.1.overall()));

        out.push_str("<table>\n<thead>\n<tr><th>Rank</th><th>Model</th>");
        for subject in &subjects {
            let _ = write!(out, "<th>{}</th>", subject);
        }
        out.push_str("</tr>\n</thead>\n<tbody>\n");

        for (rank, (model, scores)) in ranked.iter().enumerate() {
            let _ = write!(out, "<tr><td>{}</td><td>{}</td>", rank + 1, model);
            for subject in &subjects {
                match scores.subjects.get(*subject).filter(|s| s.n > 0) {
                    Some(score) => {
                        let _ = write!(out, "<td>{:.2}%</td>", score.acc() * 100.0);
                    }
                    None => out.push_str("<td>-</td>"),
                }
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>\n\n");
    }

    out
}

/// Force the KoCEM title onto the first line
pub fn ensure_title(readme: &str) -> String {
    match readme.split_once('\n') {
        Some((first, rest)) if first.trim_start().starts_with("# ") => format!("{}\n{}", README_TITLE, rest),
        None if readme.trim_start().starts_with("# ") => format!("{}\n", README_TITLE),
        _ => format!("{}\n\n{}", README_TITLE, readme),
    }
}

/// Replace the leaderboard section up to the next `## ` heading, inserting it
/// after the title when absent
pub fn replace_section(readme: &str, section: &str) -> String {
    let lines: Vec<&str> = readme.split_inclusive('\n').collect();
    let start = lines
        .iter()
        .position(|l| l.trim().to_lowercase().starts_with("## leaderboard"));

    let Some(start) = start else {
        let insert_at = usize::from(lines.first().is_some_and(|l| l.starts_with("# ")));
        let mut out: String = lines[..insert_at].concat();
        out.push('\n');
        out.push_str(section);
        out.push('\n');
        out.push_str(&lines[insert_at..].concat());
        return out;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|l| l.starts_with("## "))
        .map(|offset| start + 1 + offset);

    let mut out: String = lines[..start].concat();
    out.push_str(section);
    out.push('\n');
    if let Some(end) = end {
        out.push_str(&lines[end..].concat());
    }
    out
}

/// Output of [`update_readme`]
#[derive(Debug, Clone, PartialEq)]
pub enum ReadmeUpdate {
    Updated { path: PathBuf, locales: usize, models: usize },
    NothingToUpdate(String),
}

/// Rebuild the leaderboard in `readme_path` from results under `output_root`
///
/// Results are taken from `<output_root>/mcqa`, or `<output_root>/test` when
/// no mcqa results exist.
pub fn update_readme(output_root: &Path, prompt_root: &Path, readme_path: &Path) -> Result<ReadmeUpdate, EvalError> {
    let base = ["mcqa", "test"]
        .iter()
        .map(|name| output_root.join(name))
        .find(|dir| dir.is_dir());
    let Some(base) = base else {
        return Ok(ReadmeUpdate::NothingToUpdate(format!(
            "no mcqa or test results under {}",
            output_root.display()
        )));
    };

    let locales = prompt_locales(prompt_root);
    if locales.is_empty() {
        return Ok(ReadmeUpdate::NothingToUpdate(format!(
            "no locales found under {}",
            prompt_root.display()
        )));
    }

    let board = collect(&base, &locales)?;
    if board.values().all(|models| models.is_empty()) {
        return Ok(ReadmeUpdate::NothingToUpdate(
            "no result.json files found for detected locales".to_string(),
        ));
    }

    let current = match std::fs::read_to_string(readme_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(EvalError::Read {
                path: readme_path.to_path_buf(),
                source,
            });
        }
    };

    let updated = replace_section(&ensure_title(&current), &render(&board));
    std::fs::write(readme_path, updated).map_err(|source| EvalError::Persistence {
        path: readme_path.to_path_buf(),
        source,
    })?;

    let models = board.values().map(BTreeMap::len).sum();
    tracing::info!(path = %readme_path.display(), locales = board.len(), models, "leaderboard updated");
    Ok(ReadmeUpdate::Updated {
        path: readme_path.to_path_buf(),
        locales: board.len(),
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::write_json;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_result(base: &Path, locale: &str, model: &str, split: &str, subject: &str, acc: f64, n: usize) {
        let path = base.join(locale).join(model).join(split).join(subject).join(RESULT_FILE);
        write_json(&path, &json!({"acc": acc, "std_dev": 0.0, "num_example": n})).unwrap();
    }

    #[test]
    fn test_collect_weights_by_num_example() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("mcqa");
        write_result(&base, "en", "gpt-4.1", "dev", "Materials", 1.0, 2);
        write_result(&base, "en", "gpt-4.1", "test", "Materials", 0.5, 8);
        write_result(&base, "en", "gpt-4.1", "test", "Interior", 0.25, 4);
        write_result(&base, "fr", "gpt-4.1", "test", "Interior", 0.25, 4);

        let board = collect(&base, &["en".to_string(), "ko".to_string()]).unwrap();
        assert_eq!(board.len(), 1);

        let scores = &board["en"]["gpt-4.1"];
        let materials = scores.subjects["Materials"];
        assert_eq!(materials.n, 10);
        assert!((materials.acc() - 0.6).abs() < 1e-12);
        assert!((scores.overall() - 7.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_render_ranks_models() {
        let mut models = BTreeMap::new();
        let mut weak = ModelScores::default();
        weak.subjects.insert("Materials".into(), SubjectScore { acc_sum: 1.0, n: 4 });
        let mut strong = ModelScores::default();
        strong.subjects.insert("Materials".into(), SubjectScore { acc_sum: 3.0, n: 4 });
        strong.subjects.insert("Interior".into(), SubjectScore { acc_sum: 1.0, n: 1 });
        models.insert("a-weak".to_string(), weak);
        models.insert("b-strong".to_string(), strong);
        let mut board = Leaderboard::new();
        board.insert("en".to_string(), models);

        let section = render(&board);
        assert!(section.starts_with("## Leaderboard\n"));
        assert!(section.contains("### Locale: en"));
        assert!(section.contains("<th>Interior</th><th>Materials</th>"));
        assert!(section.contains("<tr><td>1</td><td>b-strong</td><td>100.00%</td><td>75.00%</td></tr>"));
        assert!(section.contains("<tr><td>2</td><td>a-weak</td><td>-</td><td>25.00%</td></tr>"));
    }

    #[test]
    fn test_replace_existing_section() {
        let readme = "# Title\n\nIntro\n\n## Leaderboard\n\nold table\n\n## Usage\n\nrun it\n";
        let updated = replace_section(readme, "## Leaderboard\n\nnew table\n");
        assert_eq!(
            updated,
            "# Title\n\nIntro\n\n## Leaderboard\n\nnew table\n\n## Usage\n\nrun it\n"
        );
    }

    #[test]
    fn test_replace_section_at_end_and_missing() {
        let at_end = replace_section("# T\n## Leaderboard\nold\n", "## Leaderboard\nnew\n");
        assert_eq!(at_end, "# T\n## Leaderboard\nnew\n\n");

        let missing = replace_section("# T\nbody\n", "## Leaderboard\nnew\n");
        assert_eq!(missing, "# T\n\n## Leaderboard\nnew\n\nbody\n");
    }

    #[test]
    fn test_ensure_title() {
        assert!(ensure_title("# Other project\nbody\n").starts_with(&format!("{}\nbody", README_TITLE)));
        assert_eq!(ensure_title("body\n"), format!("{}\n\nbody\n", README_TITLE));
    }

    #[test]
    fn test_update_readme() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("output");
        let prompts = dir.path().join("prompts");
        std::fs::create_dir_all(prompts.join("en")).unwrap();
        write_result(&output.join("mcqa"), "en", "gpt-4.1", "dev", "Materials", 0.5, 2);

        let readme = dir.path().join("README.md");
        std::fs::write(&readme, "# Old\n\n## Leaderboard\n\nstale\n\n## License\n\nMIT\n").unwrap();

        let update = update_readme(&output, &prompts, &readme).unwrap();
        assert_eq!(
            update,
            ReadmeUpdate::Updated {
                path: readme.clone(),
                locales: 1,
                models: 1
            }
        );

        let content = std::fs::read_to_string(&readme).unwrap();
        assert!(content.starts_with(README_TITLE));
        assert!(content.contains("<td>50.00%</td>"));
        assert!(!content.contains("stale"));
        assert!(content.contains("## License\n\nMIT"));
    }

    #[test]
    fn test_update_readme_without_results() {
        let dir = tempdir().unwrap();
        let update = update_readme(&dir.path().join("output"), dir.path(), &dir.path().join("README.md")).unwrap();
        assert!(matches!(update, ReadmeUpdate::NothingToUpdate(_)));
    }
}
