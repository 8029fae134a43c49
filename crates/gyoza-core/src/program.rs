//! Semi-join program containers.
//!
//! A [`Level`] collects the semi-joins discovered during one ear-removal
//! iteration. The program itself holds a single [`MergedLevel`]: the first
//! level is merged in directly, later levels are promoted with
//! [`SemiJoinProgram::merge_up`]. Entry order is semantically significant —
//! the emitter materializes ears entry by entry, so every entry whose parent
//! appears as an ear of another entry must come first.

use std::collections::HashSet;

use crate::types::Relation;

/// One ear bound to one parent, scored by the ear's cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemiJoin {
    pub ear: Relation,
    pub parent: Relation,
    pub score: u64,
}

/// All ears of one parent, with their summed score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSemiJoin {
    pub ears: Vec<Relation>,
    pub parent: Relation,
    pub score: u64,
}

/// Ordered, ear-unique collection of semi-joins from one iteration.
#[derive(Debug, Clone, Default)]
pub struct Level {
    semi_joins: Vec<SemiJoin>,
}

impl Level {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a semi-join, dropping it when its ear is already an ear of
    /// this level.
    pub fn append(&mut self, sj: SemiJoin) {
        if self
            .semi_joins
            .iter()
            .any(|existing| existing.ear.alias == sj.ear.alias)
        {
            return;
        }
        self.semi_joins.push(sj);
    }

    pub fn is_empty(&self) -> bool {
        self.semi_joins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.semi_joins.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SemiJoin> {
        self.semi_joins.iter()
    }

    /// Parents of this level, deduplicated, in first-seen order.
    pub fn parents(&self) -> Vec<String> {
        let mut parents = Vec::new();
        for sj in &self.semi_joins {
            if !parents.contains(&sj.parent.alias) {
                parents.push(sj.parent.alias.clone());
            }
        }
        parents
    }

    pub fn ears(&self) -> HashSet<String> {
        self.semi_joins
            .iter()
            .map(|sj| sj.ear.alias.clone())
            .collect()
    }

    /// Group by parent in first-seen order, summing scores. Insertion order
    /// of the semi-joins is preserved within and across groups.
    pub fn merge(self) -> Vec<MergedSemiJoin> {
        let mut merged: Vec<MergedSemiJoin> = Vec::new();
        for sj in self.semi_joins {
            if let Some(entry) = merged
                .iter_mut()
                .find(|entry| entry.parent.alias == sj.parent.alias)
            {
                entry.ears.push(sj.ear);
                entry.score += sj.score;
            } else {
                merged.push(MergedSemiJoin {
                    ears: vec![sj.ear],
                    parent: sj.parent,
                    score: sj.score,
                });
            }
        }
        merged
    }
}

/// The physical join column pair behind one (ear, parent) edge. One edge may
/// contribute several pairs when more than one attribute pair is equated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentChildColumns {
    pub parent_alias: String,
    pub child_alias: String,
    pub parent_column: String,
    pub child_column: String,
}

/// The planner's output: one merged level in bottom-up order.
#[derive(Debug, Clone, Default)]
pub struct SemiJoinProgram {
    entries: Vec<MergedSemiJoin>,
}

impl SemiJoinProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the first level into the (empty) program.
    pub fn absorb(&mut self, level: Level) {
        debug_assert!(self.entries.is_empty());
        self.entries = order_bottom_up(level.merge());
    }

    /// Promote a later level into the merged level: ears and scores of an
    /// already-known parent are appended to its entry, unknown parents open
    /// fresh entries. The result is re-ordered bottom-up.
    pub fn merge_up(&mut self, level: Level) {
        for sj in level.merge() {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|entry| entry.parent.alias == sj.parent.alias)
            {
                entry.ears.extend(sj.ears);
                entry.score += sj.score;
            } else {
                self.entries.push(sj);
            }
        }
        self.entries = order_bottom_up(std::mem::take(&mut self.entries));
    }

    pub fn entries(&self) -> &[MergedSemiJoin] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every alias appearing in the program, ears and parents alike.
    pub fn aliases(&self) -> HashSet<String> {
        let mut aliases = HashSet::new();
        for entry in &self.entries {
            aliases.insert(entry.parent.alias.clone());
            for ear in &entry.ears {
                aliases.insert(ear.alias.clone());
            }
        }
        aliases
    }

    /// Ears of the program, in emission order.
    pub fn ears(&self) -> Vec<&Relation> {
        self.entries
            .iter()
            .flat_map(|entry| entry.ears.iter())
            .collect()
    }

    /// The unique parent that never appears as an ear, if the program forms
    /// a rooted tree.
    pub fn root(&self) -> Option<&Relation> {
        let ears: HashSet<&str> = self
            .entries
            .iter()
            .flat_map(|entry| entry.ears.iter().map(|ear| ear.alias.as_str()))
            .collect();
        let mut roots = self
            .entries
            .iter()
            .map(|entry| &entry.parent)
            .filter(|parent| !ears.contains(parent.alias.as_str()));
        let root = roots.next()?;
        // A second non-ear parent means the edges do not form a tree.
        let mut rest = roots;
        if rest.any(|other| other.alias != root.alias) {
            return None;
        }
        Some(root)
    }

    /// Parent of an alias, when it appears as an ear.
    pub fn parent_of(&self, alias: &str) -> Option<&Relation> {
        self.entries
            .iter()
            .find(|entry| entry.ears.iter().any(|ear| ear.alias == alias))
            .map(|entry| &entry.parent)
    }
}

/// Re-order merged entries so that, for every entry `e`, all entries whose
/// parent appears among `e`'s ears come before `e`.
///
/// This is a DFS over the "ear points to another parent" relation, stable
/// with respect to the input order: entries with no such dependency keep
/// their relative positions. The planner guarantees the relation is acyclic
/// (an alias is removed at most once), so the visit stack cannot revisit an
/// in-progress entry; the `visited` check is what terminates the walk.
pub fn order_bottom_up(entries: Vec<MergedSemiJoin>) -> Vec<MergedSemiJoin> {
    let mut ordered: Vec<MergedSemiJoin> = Vec::with_capacity(entries.len());
    let mut visited = vec![false; entries.len()];

    fn visit(
        index: usize,
        entries: &[MergedSemiJoin],
        visited: &mut [bool],
        ordered: &mut Vec<MergedSemiJoin>,
    ) {
        if visited[index] {
            return;
        }
        visited[index] = true;
        for ear in &entries[index].ears {
            if let Some(dep) = entries
                .iter()
                .position(|entry| entry.parent.alias == ear.alias)
            {
                if dep != index {
                    visit(dep, entries, visited, ordered);
                }
            }
        }
        ordered.push(entries[index].clone());
    }

    for index in 0..entries.len() {
        visit(index, &entries, &mut visited, &mut ordered);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attribute;

    fn rel(alias: &str, size: u64) -> Relation {
        Relation {
            alias: alias.to_string(),
            name: alias.to_string(),
            attributes: vec![Attribute::new("id", alias)],
            size,
        }
    }

    fn sj(ear: &str, parent: &str, score: u64) -> SemiJoin {
        SemiJoin {
            ear: rel(ear, score),
            parent: rel(parent, 0),
            score,
        }
    }

    #[test]
    fn append_drops_duplicate_ears() {
        let mut level = Level::new();
        level.append(sj("a", "b", 1));
        level.append(sj("a", "c", 2));
        assert_eq!(level.len(), 1);
        assert_eq!(level.iter().next().unwrap().parent.alias, "b");
    }

    #[test]
    fn merge_groups_by_parent_in_first_seen_order() {
        let mut level = Level::new();
        level.append(sj("a", "p", 1));
        level.append(sj("b", "q", 2));
        level.append(sj("c", "p", 4));
        let merged = level.merge();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].parent.alias, "p");
        assert_eq!(merged[0].score, 5);
        assert_eq!(
            merged[0].ears.iter().map(|e| &e.alias).collect::<Vec<_>>(),
            ["a", "c"]
        );
        assert_eq!(merged[1].parent.alias, "q");
    }

    #[test]
    fn merge_up_extends_known_parents_and_orders_bottom_up() {
        let mut program = SemiJoinProgram::new();
        let mut first = Level::new();
        first.append(sj("a", "p", 1));
        program.absorb(first);

        let mut second = Level::new();
        second.append(sj("b", "p", 2));
        second.append(sj("p", "r", 3));
        program.merge_up(second);

        let entries = program.entries();
        assert_eq!(entries.len(), 2);
        // p's own entry must precede the entry that uses p as an ear.
        assert_eq!(entries[0].parent.alias, "p");
        assert_eq!(entries[0].score, 3);
        assert_eq!(entries[1].parent.alias, "r");
        assert_eq!(program.root().unwrap().alias, "r");
    }

    #[test]
    fn order_bottom_up_moves_dependencies_first() {
        // Entry for parent k references ear j, whose own entry comes later.
        let entries = vec![
            MergedSemiJoin {
                ears: vec![rel("a", 1), rel("j", 2)],
                parent: rel("k", 0),
                score: 3,
            },
            MergedSemiJoin {
                ears: vec![rel("y", 1)],
                parent: rel("j", 0),
                score: 1,
            },
        ];
        let ordered = order_bottom_up(entries);
        assert_eq!(ordered[0].parent.alias, "j");
        assert_eq!(ordered[1].parent.alias, "k");
    }

    #[test]
    fn order_bottom_up_is_stable_without_dependencies() {
        let entries = vec![
            MergedSemiJoin {
                ears: vec![rel("a", 1)],
                parent: rel("p", 0),
                score: 1,
            },
            MergedSemiJoin {
                ears: vec![rel("b", 1)],
                parent: rel("q", 0),
                score: 1,
            },
        ];
        let ordered = order_bottom_up(entries.clone());
        assert_eq!(ordered, entries);
    }

    #[test]
    fn root_is_the_parent_that_is_never_an_ear() {
        let mut program = SemiJoinProgram::new();
        let mut level = Level::new();
        level.append(sj("kt", "t", 1));
        level.append(sj("mk", "t", 5));
        program.absorb(level);
        assert_eq!(program.root().unwrap().alias, "t");
        assert_eq!(program.parent_of("kt").unwrap().alias, "t");
        assert!(program.parent_of("t").is_none());
    }
}
