use indexmap::IndexMap;

use super::{Computer, QueueItem};
use crate::config::{
    AggregateConfig, CONFIG, CombineConfig, Config, GeneralConfig, ReportConfig,
};
use crate::error::Error;
use crate::key::Key;
use crate::ops;
use crate::quantity::Label;
use crate::task::{Arg, Task};

/// Attempts per queued section; enough for one forward reference between
/// sections.
const MAX_TRIES: usize = 2;

impl Computer {
    /// Applies every section of `config`, then stores it under `config`.
    ///
    /// Unit definitions go to this computer's own registry. Aliases, group
    /// aggregations, combinations, general tasks and reports are registered
    /// as ordinary tasks, in any order: a section that refers to a key
    /// another section adds is retried once the rest have run. Sections this
    /// crate does not know are logged and skipped; they stay available to
    /// operators through the `config` node.
    ///
    /// Either every section is applied or, on error, none is.
    pub fn configure(&mut self, config: Config) -> Result<(), Error> {
        let mut next = self.clone();
        next.apply_config(&config)?;
        next.replace(CONFIG, Task::literal(config.clone()))?;
        next.config = config;
        *self = next;
        Ok(())
    }

    fn apply_config(&mut self, config: &Config) -> Result<(), Error> {
        for (from, to) in &config.units.replace {
            self.units.replace(from, to);
        }
        for (symbol, expr) in &config.units.define {
            if let Err(e) = self.units.define(symbol, expr) {
                tracing::warn!("Skipping unit definition {symbol} = {expr}: {e}");
            }
        }

        let mut queue: Vec<QueueItem<'_>> = vec![];
        for (new, existing) in &config.alias {
            queue.push(Box::new(move |c: &mut Computer| -> Result<Vec<Key>, Error> {
                Ok(vec![c.alias(new.as_str(), existing.as_str())?])
            }));
        }
        for section in &config.aggregate {
            queue.push(Box::new(move |c: &mut Computer| c.configure_aggregate(section)));
        }
        for section in &config.combine {
            queue.push(Box::new(move |c: &mut Computer| c.configure_combine(section)));
        }
        for section in &config.general {
            queue.push(Box::new(move |c: &mut Computer| c.configure_general(section)));
        }
        for section in &config.report {
            queue.push(Box::new(move |c: &mut Computer| c.configure_report(section)));
        }
        let added = self.add_queue(queue, MAX_TRIES)?;
        tracing::debug!("Configuration added {} key(s)", added.len());

        if let Some(default) = &config.default {
            self.set_default(default.as_str())?;
        }

        for name in config.extra.keys() {
            tracing::warn!("No handler for configuration section named {name}; ignored");
        }
        Ok(())
    }

    fn configure_aggregate(&mut self, section: &AggregateConfig) -> Result<Vec<Key>, Error> {
        let groups: IndexMap<Label, Vec<Label>> = section
            .groups
            .iter()
            .map(|(name, members)| (Label::from(name.as_str()), members.clone()))
            .collect();

        let mut added = vec![];
        for qty in self.check_keys(&section.quantities)? {
            let keys =
                self.aggregate_groups(qty, &section.tag, &section.dim, groups.clone(), true)?;
            tracing::info!("Add {} + {} partial sums", keys[0], keys.len() - 1);
            added.extend(keys);
        }
        Ok(added)
    }

    fn configure_combine(&mut self, section: &CombineConfig) -> Result<Vec<Key>, Error> {
        let key = Key::parse(&section.key)?;

        let mut args = Vec::with_capacity(section.inputs.len());
        let mut select = Vec::with_capacity(section.inputs.len());
        let mut weights = Vec::with_capacity(section.inputs.len());

        for input in &section.inputs {
            let mut dims: Vec<&str> = key.dims().collect();
            dims.extend(input.select.keys().map(String::as_str));

            let inferred = self.infer_keys([input.quantity.as_str()], Some(dims.as_slice()))?;
            args.extend(self.check_keys(inferred)?.into_iter().map(Arg::Ref));
            select.push(input.select.clone());
            weights.push(input.weight);
        }

        tracing::debug!("Combining {args:?} into {key}");
        let keys = self.add_with_sums(key, Task::compute(ops::combine(select, weights), args))?;
        tracing::info!("Add {} + {} partial sums", keys[0], keys.len() - 1);
        Ok(keys)
    }

    fn configure_general(&mut self, section: &GeneralConfig) -> Result<Vec<Key>, Error> {
        let key = Key::parse(&section.key)?;
        if section.comp == "product" {
            let keys = self.add_product(key.name(), &section.inputs)?;
            tracing::info!("Add {} + {} partial sums", keys[0], keys.len() - 1);
            return Ok(keys);
        }

        let op = ops::from_name(&section.comp, &section.args, &self.units)?;
        let inputs = self.check_keys(&section.inputs)?;
        let task = Task::compute(op, inputs.into_iter().map(Arg::Ref));

        if section.sums {
            let keys = self.add_with_sums(key, task)?;
            tracing::info!("Add {} + {} partial sums", keys[0], keys.len() - 1);
            Ok(keys)
        } else {
            tracing::info!("Add {key} using {}", section.comp);
            Ok(vec![self.add(key, task)?])
        }
    }

    fn configure_report(&mut self, section: &ReportConfig) -> Result<Vec<Key>, Error> {
        let key = Key::parse(&section.key)?.append([&section.dim])?;
        let members = self.check_keys(&section.members)?;
        let labels = members
            .iter()
            .map(|member| Label::from(member.name_and_tag().as_str()))
            .collect();

        tracing::info!("Add report {key} of {} member(s)", members.len());
        let op = ops::concat_new(&section.dim, labels);
        Ok(vec![self.add(key, Task::compute(op, members.into_iter().map(Arg::Ref)))?])
    }
}
