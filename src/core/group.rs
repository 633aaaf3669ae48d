//! Parameter-sweep job groups.
//!
//! A [`JobGroup`] is one node in the dependency graph that fans out into
//! `tasks` concrete invocations, one per combination of its argument values.
//! Grid schedulers identify the invocations only by an integer task index,
//! so the index-to-combination mapping must be deterministic: index `i` is
//! decoded in mixed radix over the ordered argument sequences, with the
//! first parameter as the least significant digit.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::graph::GraphError;
use super::types::NodeId;

/// Environment variable holding the 1-based array task index.
///
/// Grid schedulers set this for each task of an array job; the local pool
/// sets it the same way so both strategies run the identical script.
pub const TASK_ID_VAR: &str = "SGE_TASK_ID";

/// Ordered mapping from parameter name to its candidate values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    entries: Vec<(String, Vec<String>)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, or replace the values of an existing one in place.
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, values);
        self
    }

    /// Add a parameter, or replace the values of an existing one in place.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((name, values)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of combinations: the product of all value-sequence lengths.
    ///
    /// `None` when the product overflows `usize`.
    pub fn combinations(&self) -> Option<usize> {
        self.entries
            .iter()
            .try_fold(1usize, |total, (_, values)| total.checked_mul(values.len()))
    }

    /// Decode a 0-based task index into one value per parameter.
    ///
    /// Returns `None` when `index` is outside `[0, combinations())`.
    pub fn decode(&self, index: usize) -> Option<Vec<(&str, &str)>> {
        // An overflowing product admits every representable index.
        if self.combinations().is_some_and(|total| index >= total) {
            return None;
        }

        let mut remainder = index;
        let mut assignment = Vec::with_capacity(self.entries.len());
        for (name, values) in &self.entries {
            let radix = values.len();
            assignment.push((name.as_str(), values[remainder % radix].as_str()));
            remainder /= radix;
        }
        Some(assignment)
    }
}

impl Serialize for Arguments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Arguments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArgumentsVisitor;

        impl<'de> Visitor<'de> for ArgumentsVisitor {
            type Value = Arguments;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from parameter name to a list of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Arguments, A::Error> {
                let mut arguments = Arguments::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    arguments.insert(name, values);
                }
                Ok(arguments)
            }
        }

        deserializer.deserialize_map(ArgumentsVisitor)
    }
}

/// A parameterised job expanded into one task per argument combination.
///
/// All tasks share the group's dependency set and a single generated control
/// script; a task selects its parameter values from [`TASK_ID_VAR`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGroup {
    name: String,
    command: String,
    queue: Option<String>,
    arguments: Arguments,
    dependencies: Vec<NodeId>,
    submitted: bool,
    tasks: usize,
}

impl JobGroup {
    /// Create a group from a command template and its arguments.
    ///
    /// The command refers to parameters as shell variables, e.g.
    /// `my_cmd -foo $foo -bar $bar`. Every parameter needs at least one
    /// value and a name usable as a shell variable.
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        arguments: Arguments,
    ) -> Result<Self, GraphError> {
        let name = name.into();
        for (parameter, values) in arguments.iter() {
            if !is_shell_identifier(parameter) {
                return Err(GraphError::InvalidParameter {
                    group: name,
                    parameter: parameter.to_string(),
                });
            }
            if values.is_empty() {
                return Err(GraphError::EmptyParameter {
                    group: name,
                    parameter: parameter.to_string(),
                });
            }
        }

        let tasks = arguments
            .combinations()
            .ok_or_else(|| GraphError::TooManyTasks(name.clone()))?;
        Ok(Self {
            name,
            command: command.into(),
            queue: None,
            arguments,
            dependencies: Vec::new(),
            submitted: false,
            tasks,
        })
    }

    /// Set the grid queue this group should be submitted to.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Declare a dependency before the group is added to a graph.
    pub fn depends_on(mut self, dependency: NodeId) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command template, before parameter substitution.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Number of concrete invocations this group expands to. Always at least 1.
    pub fn tasks(&self) -> usize {
        self.tasks
    }

    /// Parameter assignment for a 0-based task index.
    pub fn task_arguments(&self, index: usize) -> Option<Vec<(&str, &str)>> {
        self.arguments.decode(index)
    }

    /// Render the bash control script for this group.
    ///
    /// The script rebases [`TASK_ID_VAR`] to zero, declares one array per
    /// parameter, peels off one mixed-radix digit per parameter and finally
    /// runs the command template. Output depends only on the group's
    /// arguments and command.
    pub fn generate_script(&self) -> String {
        let mut script = format!("let \"TASK_ID=${} - 1\"\n", TASK_ID_VAR);

        for (name, values) in self.arguments.iter() {
            let quoted: Vec<String> = values.iter().map(|v| shell_quote(v)).collect();
            script.push_str(&format!("{}_ARRAY=( {} )\n", name, quoted.join(" ")));
        }
        script.push('\n');

        for (name, values) in self.arguments.iter() {
            let count = values.len();
            script.push_str(&format!("let \"{name}_INDEX=$TASK_ID % {count}\"\n"));
            script.push_str(&format!("{name}=${{{name}_ARRAY[${name}_INDEX]}}\n"));
            script.push_str(&format!("let \"TASK_ID=$TASK_ID / {count}\"\n"));
        }

        script.push('\n');
        script.push_str(&self.command);
        script.push('\n');
        script
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.dependencies
    }

    pub(crate) fn set_submitted(&mut self) {
        self.submitted = true;
    }
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Quote a value for a bash array literal, leaving plain words untouched.
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,@%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
