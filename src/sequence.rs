//! Sequence registry (component A): an immutable-after-load table of named
//! frame ranges and compiled combo playlists.

use std::collections::HashMap;

/// A named, half-open-in-time, inclusive-in-frames range of access units.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub name: String,
    pub start_frame: u32,
    pub end_frame: u32,
    pub seg_start_ns: u64,
    pub seg_stop_ns: u64,
}

impl Sequence {
    fn with_bounds(name: String, start_frame: u32, end_frame: u32, fps: f64) -> Self {
        let seg_start_ns = (start_frame as f64 * 1_000_000_000.0 / fps).round() as u64;
        let seg_stop_ns = ((end_frame as u64 + 1) as f64 * 1_000_000_000.0 / fps).round() as u64;
        Self {
            name,
            start_frame,
            end_frame,
            seg_start_ns,
            seg_stop_ns,
        }
    }
}

/// `RepeatMode` controls what `enqueue_with_repeat` installs as the repeat order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    None,
    Last,
    Full,
}

/// A named ordered list of sequence indices, optionally looping.
#[derive(Debug, Clone)]
pub struct Combo {
    pub name: String,
    pub order: Vec<usize>,
    pub loop_at_end: bool,
}

/// A name resolved against the registry: either a single sequence or a combo.
pub enum Resolved<'a> {
    Sequence(usize),
    Combo(&'a Combo),
}

/// One textual definition as read from config, before cross-reference resolution.
#[derive(Debug, Clone)]
pub enum RawEntry {
    Sequence { name: String, start_frame: u32, end_frame: u32 },
    Combo { name: String, order: Vec<String>, loop_at_end: bool },
}

/// Immutable-after-load table of sequences and compiled combos.
pub struct Registry {
    sequences: Vec<Sequence>,
    combos: Vec<Combo>,
    seq_by_name: HashMap<String, usize>,
    combo_by_name: HashMap<String, usize>,
}

impl Registry {
    /// Builds a registry from raw config entries, resolving every combo's textual
    /// `order` against the sequence table. Unresolved references fail the load.
    pub fn build(entries: Vec<RawEntry>, fps: f64) -> anyhow::Result<Self> {
        let mut sequences = Vec::new();
        let mut seq_by_name = HashMap::new();
        let mut raw_combos = Vec::new();

        for entry in entries {
            match entry {
                RawEntry::Sequence { name, start_frame, end_frame } => {
                    if start_frame > end_frame {
                        anyhow::bail!("sequence '{name}': start_frame > end_frame");
                    }
                    if seq_by_name.contains_key(&name) {
                        anyhow::bail!("duplicate sequence name '{name}'");
                    }
                    let idx = sequences.len();
                    seq_by_name.insert(name.clone(), idx);
                    sequences.push(Sequence::with_bounds(name, start_frame, end_frame, fps));
                }
                RawEntry::Combo { name, order, loop_at_end } => {
                    raw_combos.push((name, order, loop_at_end));
                }
            }
        }

        if sequences.is_empty() {
            anyhow::bail!("at least one non-combo sequence must be defined");
        }

        let mut combos = Vec::new();
        let mut combo_by_name = HashMap::new();
        for (name, order_names, loop_at_end) in raw_combos {
            if seq_by_name.contains_key(&name) || combo_by_name.contains_key(&name) {
                anyhow::bail!("duplicate name '{name}'");
            }
            let mut order = Vec::with_capacity(order_names.len());
            for ref_name in order_names {
                let idx = seq_by_name
                    .get(&ref_name)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("combo '{name}' references unknown sequence '{ref_name}'"))?;
                order.push(idx);
            }
            let idx = combos.len();
            combo_by_name.insert(name.clone(), idx);
            combos.push(Combo { name, order, loop_at_end });
        }

        Ok(Self { sequences, combos, seq_by_name, combo_by_name })
    }

    /// Sequences first, combos second, matching the shared-namespace lookup rule.
    pub fn resolve(&self, name: &str) -> Option<Resolved<'_>> {
        if let Some(&idx) = self.seq_by_name.get(name) {
            return Some(Resolved::Sequence(idx));
        }
        self.combo_by_name
            .get(name)
            .map(|&idx| Resolved::Combo(&self.combos[idx]))
    }

    pub fn sequence(&self, idx: usize) -> &Sequence {
        &self.sequences[idx]
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn combos(&self) -> &[Combo] {
        &self.combos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<RawEntry> {
        vec![
            RawEntry::Sequence { name: "intro".into(), start_frame: 0, end_frame: 179 },
            RawEntry::Sequence { name: "loop".into(), start_frame: 300, end_frame: 419 },
            RawEntry::Combo {
                name: "demo".into(),
                order: vec!["intro".into(), "loop".into()],
                loop_at_end: true,
            },
        ]
    }

    #[test]
    fn resolves_sequences_before_combos() {
        let reg = Registry::build(entries(), 30.0).unwrap();
        assert!(matches!(reg.resolve("intro"), Some(Resolved::Sequence(0))));
        assert!(matches!(reg.resolve("demo"), Some(Resolved::Combo(_))));
        assert!(reg.resolve("nonesuch").is_none());
    }

    #[test]
    fn derives_segment_bounds_from_fps() {
        let reg = Registry::build(entries(), 30.0).unwrap();
        let intro = reg.sequence(0);
        assert_eq!(intro.seg_start_ns, 0);
        assert_eq!(intro.seg_stop_ns, 180 * 1_000_000_000 / 30);
    }

    #[test]
    fn unresolved_combo_reference_fails_load() {
        let entries = vec![
            RawEntry::Sequence { name: "a".into(), start_frame: 0, end_frame: 9 },
            RawEntry::Combo { name: "demo".into(), order: vec!["missing".into()], loop_at_end: false },
        ];
        assert!(Registry::build(entries, 30.0).is_err());
    }

    #[test]
    fn rejects_start_after_end() {
        let entries = vec![RawEntry::Sequence { name: "a".into(), start_frame: 10, end_frame: 5 }];
        assert!(Registry::build(entries, 30.0).is_err());
    }
}
