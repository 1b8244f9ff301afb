//! Cartesian expansion of sweep axes and application templates.
//!
//! Both expansions walk their axes depth-first, left to right, and return
//! freshly built vectors. Each one also tracks an index on a distinguished
//! axis: the core index follows `general/total_cores`, the user thread index
//! follows the placeholder carrying the thread-count marker. Until that axis
//! is entered the index is `None`, which pairs with anything.

use serde::Serialize;

use crate::error::ExpandResult;
use crate::parser::{AppTemplate, NUM_PROCESSES, ParameterSpec, parse_count};

/// Axis whose position drives the core index.
pub const TOTAL_CORES: &str = "general/total_cores";

/// One combination of the simulator's variable parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimVariant {
    pub process_count: u32,
    pub flags: String,
    pub core_index: Option<u32>,
}

/// One concrete argument string of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInstance {
    pub name: String,
    pub flags: String,
    pub user_thread_index: Option<u32>,
}

/// Expand the cartesian product of `variables` on top of `fixed_args`.
pub fn generate(
    variables: &[ParameterSpec],
    fixed_args: &str,
    baseline_procs: u32,
) -> ExpandResult<Vec<SimVariant>> {
    expand_axes(variables, fixed_args.to_string(), baseline_procs, None)
}

fn expand_axes(
    axes: &[ParameterSpec],
    flags: String,
    process_count: u32,
    core_index: Option<u32>,
) -> ExpandResult<Vec<SimVariant>> {
    let Some((axis, rest)) = axes.split_first() else {
        return Ok(vec![SimVariant {
            process_count,
            flags,
            core_index,
        }]);
    };

    let mut variants = Vec::new();
    for (position, value) in axis.values().iter().enumerate() {
        let process_count = if axis.name == NUM_PROCESSES {
            parse_count(&axis.name, value)?
        } else {
            process_count
        };
        let core_index = if axis.name == TOTAL_CORES {
            Some(position as u32)
        } else {
            core_index
        };
        let flags = append_flag(&flags, &format!("--{}={}", axis.name, value));
        variants.extend(expand_axes(rest, flags, process_count, core_index)?);
    }
    Ok(variants)
}

fn append_flag(flags: &str, flag: &str) -> String {
    if flags.is_empty() {
        flag.to_string()
    } else {
        format!("{flags} {flag}")
    }
}

/// Expand every placeholder combination of an application template.
pub fn expand_app(template: &AppTemplate) -> Vec<AppInstance> {
    let mut out = Vec::new();
    expand_placeholders(template, 0, String::new(), None, &mut out);
    out
}

fn expand_placeholders(
    template: &AppTemplate,
    depth: usize,
    args: String,
    thread_index: Option<u32>,
    out: &mut Vec<AppInstance>,
) {
    let literal = template.literals.get(depth).map_or("", String::as_str);
    let Some(placeholder) = template.placeholders.get(depth) else {
        out.push(AppInstance {
            name: template.name.clone(),
            flags: format!("{args}{literal}").trim().to_string(),
            user_thread_index: thread_index,
        });
        return;
    };

    for (position, value) in placeholder.values.iter().enumerate() {
        let thread_index = if template.thread_axis == Some(depth) {
            Some(position as u32)
        } else {
            thread_index
        };
        expand_placeholders(
            template,
            depth + 1,
            format!("{args}{literal}{value}"),
            thread_index,
            out,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParamValue, parse_app_template};
    use crate::range::ValueList;
    use std::collections::HashSet;

    fn axis(name: &str, values: &[&str]) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            value: ParamValue::List(ValueList {
                values: values.iter().map(|v| v.to_string()).collect(),
                thread_axis: false,
            }),
        }
    }

    #[test]
    fn product_size_and_uniqueness() {
        let axes = vec![
            axis("general/total_cores", &["16", "32", "64"]),
            axis("network/model", &["emesh", "atac"]),
            axis("caching/l2_size", &["256", "512", "1024", "2048"]),
        ];
        let variants = generate(&axes, "--general/mode=full", 1).unwrap();
        assert_eq!(variants.len(), 3 * 2 * 4);
        let unique: HashSet<_> = variants.iter().map(|v| v.flags.as_str()).collect();
        assert_eq!(unique.len(), variants.len());
        assert_eq!(
            variants[0].flags,
            "--general/mode=full --general/total_cores=16 --network/model=emesh --caching/l2_size=256"
        );
    }

    #[test]
    fn core_index_tracks_total_cores_only() {
        let axes = vec![
            axis("network/model", &["emesh", "atac"]),
            axis("general/total_cores", &["16", "32"]),
            axis("caching/l2_size", &["256", "512"]),
        ];
        let variants = generate(&axes, "", 1).unwrap();
        let indices: Vec<_> = variants.iter().map(|v| v.core_index).collect();
        assert_eq!(
            indices,
            vec![
                Some(0), Some(0), Some(1), Some(1),
                Some(0), Some(0), Some(1), Some(1),
            ]
        );
        assert!(variants[0].flags.starts_with("--network/model=emesh"));
    }

    #[test]
    fn no_total_cores_axis_is_unconstrained() {
        let variants = generate(&[axis("network/model", &["a", "b"])], "", 1).unwrap();
        assert!(variants.iter().all(|v| v.core_index.is_none()));
    }

    #[test]
    fn no_axes_yields_fixed_args() {
        let variants = generate(&[], "--general/total_cores=64", 4).unwrap();
        assert_eq!(
            variants,
            vec![SimVariant {
                process_count: 4,
                flags: "--general/total_cores=64".to_string(),
                core_index: None,
            }]
        );
    }

    #[test]
    fn num_processes_axis_overrides_baseline() {
        let axes = vec![
            axis("general/num_processes", &["1", "4"]),
            axis("network/model", &["a", "b"]),
        ];
        let variants = generate(&axes, "", 2).unwrap();
        let counts: Vec<_> = variants.iter().map(|v| v.process_count).collect();
        assert_eq!(counts, vec![1, 1, 4, 4]);
    }

    #[test]
    fn num_processes_axis_must_be_integer() {
        let axes = vec![axis("general/num_processes", &["many"])];
        assert!(generate(&axes, "", 1).is_err());
    }

    #[test]
    fn expand_app_thread_index() {
        let template = parse_app_template("fft", " -m [10,20] -p[$1:4:*2]", 1).unwrap();
        let instances = expand_app(&template);
        let got: Vec<_> = instances
            .iter()
            .map(|i| (i.flags.as_str(), i.user_thread_index))
            .collect();
        assert_eq!(
            got,
            vec![
                ("-m 10 -p1", Some(0)),
                ("-m 10 -p2", Some(1)),
                ("-m 10 -p4", Some(2)),
                ("-m 20 -p1", Some(0)),
                ("-m 20 -p2", Some(1)),
                ("-m 20 -p4", Some(2)),
            ]
        );
    }

    #[test]
    fn expand_app_without_placeholders() {
        let template = parse_app_template("ping_pong", " -n 10 ", 1).unwrap();
        let instances = expand_app(&template);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].flags, "-n 10");
        assert_eq!(instances[0].user_thread_index, None);
    }
}
