//! Sweep configuration parser.
//!
//! The format is line oriented:
//!
//! ```text
//! # comment
//! [apps]
//! fft -p[$1:16:*2] -m 20
//! [/apps]
//! [sim]
//! [general]
//! num_processes = 2
//! total_cores = [16,32]
//! [network]
//! model = [emesh,atac]
//! [/sim]
//! [plot]
//! Completion Time [Core 0, Core *]
//! [/plot]
//! ```
//!
//! `[pintool]` / `[/pintool]` are accepted in place of `[sim]` / `[/sim]`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ExpandError, ExpandResult};
use crate::range::{ValueList, parse_value_list};

/// Parameter naming the baseline process count.
pub const NUM_PROCESSES: &str = "general/num_processes";

static PARAM_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([\w-]+)\s*=\s*\[(.*)\]\s*$").expect("valid regex"));
static PARAM_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*([\w-]+)\s*=\s*("[^"]*"|\S+)\s*$"#).expect("valid regex"));
static SUBSECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]*)\]\s*$").expect("valid regex"));
static APP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([-\w]+)(.*)$").expect("valid regex"));
static PLOT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\w[^\[]*)\[(.*)\]\s*$").expect("valid regex"));

/// A parameter's value: a literal or a list to sweep over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParamValue {
    Literal(String),
    List(ValueList),
}

/// A named simulator parameter, scoped by its section path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    pub value: ParamValue,
}

impl ParameterSpec {
    /// Values this parameter takes, in order.
    pub fn values(&self) -> &[String] {
        match &self.value {
            ParamValue::Literal(v) => std::slice::from_ref(v),
            ParamValue::List(list) => &list.values,
        }
    }
}

/// An application with a templated argument string.
///
/// `literals` always holds one more entry than `placeholders`: the
/// argument string is `literals[0] p0 literals[1] p1 … literals[n]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppTemplate {
    pub name: String,
    pub literals: Vec<String>,
    pub placeholders: Vec<ValueList>,
    /// Position of the placeholder carrying the thread-count marker.
    pub thread_axis: Option<usize>,
}

/// A plotted quantity and the columns it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlotQuantity {
    pub quantity: String,
    pub cores: Vec<String>,
}

/// Everything a sweep configuration declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepConfig {
    pub fixed: Vec<ParameterSpec>,
    pub variables: Vec<ParameterSpec>,
    pub apps: Vec<AppTemplate>,
    pub plot: Vec<PlotQuantity>,
    /// Process count used unless a variable `general/num_processes` overrides it.
    pub baseline_procs: u32,
}

impl SweepConfig {
    /// Fixed parameters rendered as `--path/name=value` flags.
    pub fn fixed_args(&self) -> String {
        self.fixed
            .iter()
            .flat_map(|p| p.values().iter().map(move |v| format!("--{}={}", p.name, v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Apps,
    Sim,
    Plot,
}

/// Read and parse a sweep configuration file.
pub fn load_sweep(path: &Path) -> ExpandResult<SweepConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ExpandError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sweep(&text)
}

/// Parse sweep configuration text.
pub fn parse_sweep(text: &str) -> ExpandResult<SweepConfig> {
    let mut apps = Vec::new();
    let mut sim = Vec::new();
    let mut plot = Vec::new();
    let mut section = Section::Outside;

    for (idx, line) in text.lines().enumerate() {
        let number = idx + 1;
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        section = match (section, trimmed) {
            (_, "[apps]") => Section::Apps,
            (_, "[sim]" | "[pintool]") => Section::Sim,
            (_, "[plot]") => Section::Plot,
            (Section::Apps, "[/apps]")
            | (Section::Sim, "[/sim]" | "[/pintool]")
            | (Section::Plot, "[/plot]") => Section::Outside,
            (Section::Apps, _) => {
                apps.push((number, line));
                continue;
            }
            (Section::Sim, _) => {
                sim.push((number, line));
                continue;
            }
            (Section::Plot, _) => {
                plot.push((number, line));
                continue;
            }
            (Section::Outside, _) => continue,
        };
    }

    let (fixed, variables, baseline_procs) = parse_sim_params(&sim)?;
    let config = SweepConfig {
        fixed,
        variables,
        apps: parse_apps(&apps)?,
        plot: parse_plot(&plot)?,
        baseline_procs,
    };
    debug!(
        fixed = config.fixed.len(),
        variables = config.variables.len(),
        apps = config.apps.len(),
        "sweep config parsed"
    );
    Ok(config)
}

fn scoped(section: &str, name: &str) -> String {
    if section.is_empty() {
        name.to_string()
    } else {
        format!("{section}/{name}")
    }
}

fn parse_sim_params(
    lines: &[(usize, &str)],
) -> ExpandResult<(Vec<ParameterSpec>, Vec<ParameterSpec>, u32)> {
    let mut fixed = Vec::new();
    let mut variables = Vec::new();
    let mut baseline_procs = None;
    let mut section = String::new();

    for &(number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = PARAM_LIST.captures(line) {
            let list = parse_value_list(&caps[2])?;
            if list.thread_axis {
                warn!(line = number, "thread-count marker on a simulator parameter is ignored");
            }
            variables.push(ParameterSpec {
                name: scoped(&section, &caps[1]),
                value: ParamValue::List(list),
            });
        } else if let Some(caps) = PARAM_VALUE.captures(line) {
            if caps[2].starts_with('[') {
                return Err(ExpandError::UnbalancedBrackets {
                    line: number,
                    text: line.to_string(),
                });
            }
            let name = scoped(&section, &caps[1]);
            let value = caps[2].to_string();
            if name == NUM_PROCESSES {
                baseline_procs = Some(parse_count(&name, &value)?);
            }
            fixed.push(ParameterSpec {
                name,
                value: ParamValue::Literal(value),
            });
        } else if let Some(caps) = SUBSECTION.captures(line) {
            section = caps[1].trim().to_string();
        } else {
            return Err(ExpandError::MalformedLine {
                section: "sim",
                line: number,
                text: line.to_string(),
            });
        }
    }

    Ok((fixed, variables, baseline_procs.unwrap_or(1)))
}

pub(crate) fn parse_count(name: &str, value: &str) -> ExpandResult<u32> {
    value.trim().parse().map_err(|_| ExpandError::BadInteger {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_apps(lines: &[(usize, &str)]) -> ExpandResult<Vec<AppTemplate>> {
    let mut apps = Vec::new();
    for &(number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let caps = APP_LINE.captures(line).ok_or_else(|| ExpandError::MalformedLine {
            section: "apps",
            line: number,
            text: line.to_string(),
        })?;
        apps.push(parse_app_template(&caps[1], &caps[2], number)?);
    }
    Ok(apps)
}

/// Split an argument template into literal segments and placeholders.
pub fn parse_app_template(name: &str, args: &str, line: usize) -> ExpandResult<AppTemplate> {
    let unbalanced = || ExpandError::UnbalancedBrackets {
        line,
        text: args.to_string(),
    };

    let mut literals = Vec::new();
    let mut placeholders = Vec::new();
    let mut rest = args;
    while let Some(open) = rest.find('[') {
        let (literal, tail) = rest.split_at(open);
        if literal.contains(']') {
            return Err(unbalanced());
        }
        let close = tail.find(']').ok_or_else(unbalanced)?;
        let inner = &tail[1..close];
        if inner.contains('[') {
            return Err(unbalanced());
        }
        literals.push(literal.to_string());
        placeholders.push(parse_value_list(inner)?);
        rest = &tail[close + 1..];
    }
    if rest.contains(']') {
        return Err(unbalanced());
    }
    literals.push(rest.to_string());

    let mut marked = placeholders
        .iter()
        .enumerate()
        .filter(|(_, p)| p.thread_axis)
        .map(|(i, _)| i);
    let thread_axis = marked.next();
    if marked.next().is_some() {
        return Err(ExpandError::MultipleThreadMarkers {
            app: name.to_string(),
        });
    }

    Ok(AppTemplate {
        name: name.to_string(),
        literals,
        placeholders,
        thread_axis,
    })
}

fn parse_plot(lines: &[(usize, &str)]) -> ExpandResult<Vec<PlotQuantity>> {
    let mut plot = Vec::new();
    for &(number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let caps = PLOT_LINE.captures(line).ok_or_else(|| ExpandError::MalformedLine {
            section: "plot",
            line: number,
            text: line.to_string(),
        })?;
        plot.push(PlotQuantity {
            quantity: caps[1].trim().to_string(),
            cores: caps[2]
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        });
    }
    Ok(plot)
}
