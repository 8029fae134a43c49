//! Join-tree decision by iterative ear removal (GYO reduction).
//!
//! The planner maintains two union-finds: one over attributes (two
//! attributes are equivalent iff the WHERE clause transitively equates
//! them) and one over aliases (the surviving hypergraph components). Each
//! iteration scans ordered candidate pairs for ears, records the resulting
//! semi-joins as a [`Level`], and merges the level into the program. The
//! query is acyclic exactly when this reduces the hypergraph to a single
//! component covering every alias.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::CompileError;
use crate::program::{Level, ParentChildColumns, SemiJoin, SemiJoinProgram};
use crate::types::{Attribute, QueryIr, Relation};
use crate::union_find::UnionFind;

/// Immutable snapshot of the attribute equivalence classes, taken after
/// planning so downstream consumers never mutate the union-find.
#[derive(Debug, Clone, Default)]
pub struct AttributeClasses {
    class: HashMap<Attribute, usize>,
}

impl AttributeClasses {
    fn from_union_find(uf: &mut UnionFind<Attribute>) -> Self {
        let mut ids: HashMap<Attribute, usize> = HashMap::new();
        let mut class = HashMap::new();
        for element in uf.all_elements() {
            let rep = uf.find(&element);
            let next = ids.len();
            let id = *ids.entry(rep).or_insert(next);
            class.insert(element, id);
        }
        Self { class }
    }

    pub fn class_of(&self, attribute: &Attribute) -> Option<usize> {
        self.class.get(attribute).copied()
    }

    pub fn connected(&self, a: &Attribute, b: &Attribute) -> bool {
        match (self.class.get(a), self.class.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

/// The planner's complete output for one query.
#[derive(Debug, Clone)]
pub struct Plan {
    pub program: SemiJoinProgram,
    pub root: Relation,
    pub parent_child_columns: Vec<ParentChildColumns>,
    pub classes: AttributeClasses,
}

impl Plan {
    /// Join column pairs for one (parent, child) edge.
    pub fn columns_between(&self, parent: &str, child: &str) -> Vec<&ParentChildColumns> {
        self.parent_child_columns
            .iter()
            .filter(|pc| pc.parent_alias == parent && pc.child_alias == child)
            .collect()
    }

    /// First physical pair for a child's edge to its parent.
    pub fn child_join_pair(&self, child: &str) -> Option<&ParentChildColumns> {
        self.parent_child_columns
            .iter()
            .find(|pc| pc.child_alias == child)
    }
}

/// Decide the join tree for a query.
pub fn decide_join_tree(ir: &QueryIr) -> Result<Plan, CompileError> {
    Planner::new(ir).run()
}

struct Planner {
    /// alias -> hyperedge, iterated in alias order for determinism
    relations: BTreeMap<String, Relation>,
    attr_uf: UnionFind<Attribute>,
    rel_uf: UnionFind<String>,
    /// column name -> aliases still carrying it (one occurrence each)
    attr_aliases: HashMap<String, Vec<String>>,
    removed: HashSet<String>,
    touched: HashSet<String>,
    root: Option<String>,
}

impl Planner {
    fn new(ir: &QueryIr) -> Self {
        let relations: BTreeMap<String, Relation> = ir
            .tables
            .values()
            .map(|info| (info.alias.clone(), Relation::from_table(info)))
            .collect();

        let mut attr_uf = UnionFind::new();
        for info in ir.tables.values() {
            for jc in &info.join_cond {
                attr_uf.union(
                    &Attribute::new(jc.local_column.clone(), info.alias.clone()),
                    &Attribute::new(jc.foreign.column.clone(), jc.foreign.alias.clone()),
                );
            }
        }

        let mut rel_uf = UnionFind::new();
        let mut attr_aliases: HashMap<String, Vec<String>> = HashMap::new();
        for (alias, relation) in &relations {
            rel_uf.find(alias);
            for attribute in &relation.attributes {
                attr_aliases
                    .entry(attribute.column.clone())
                    .or_default()
                    .push(alias.clone());
            }
        }

        let root = select_root(ir, &relations);

        Self {
            relations,
            attr_uf,
            rel_uf,
            attr_aliases,
            removed: HashSet::new(),
            touched: HashSet::new(),
            root,
        }
    }

    fn run(mut self) -> Result<Plan, CompileError> {
        let total = self.relations.len();
        let mut program = SemiJoinProgram::new();

        if total == 1 {
            let root = self.relations.values().next().cloned().ok_or_else(|| {
                CompileError::parse("query references no tables")
            })?;
            return Ok(Plan {
                program,
                root,
                parent_child_columns: Vec::new(),
                classes: AttributeClasses::from_union_find(&mut self.attr_uf),
            });
        }

        let mut first = true;
        let mut prev_parents: Vec<String> = Vec::new();
        let mut prev_ears: HashSet<String> = HashSet::new();

        while self.rel_uf.num_sets() > 1 {
            let candidates = self.candidates(first, &prev_parents, &prev_ears);
            trace!(?candidates, first, "ear-removal iteration");

            let level = self.remove_ears(&candidates, total)?;
            if level.is_empty() {
                return Err(CompileError::NonAcyclicQuery {
                    reason: format!(
                        "no ear found among candidates {candidates:?} with {} components left",
                        self.rel_uf.num_sets()
                    ),
                });
            }

            prev_parents = level.parents();
            prev_ears = level.ears();
            if first {
                program.absorb(level);
            } else {
                program.merge_up(level);
            }
            first = false;
        }

        let covered = program.aliases();
        if covered.len() != total {
            return Err(CompileError::NonAcyclicQuery {
                reason: format!(
                    "program covers {} of {} aliases",
                    covered.len(),
                    total
                ),
            });
        }

        let root = program
            .root()
            .cloned()
            .ok_or_else(|| CompileError::NonAcyclicQuery {
                reason: "semi-join edges do not form a rooted tree".to_string(),
            })?;
        if let Some(forced) = &self.root {
            if &root.alias != forced {
                return Err(CompileError::NonAcyclicQuery {
                    reason: format!(
                        "designated root '{forced}' ended up below '{}'",
                        root.alias
                    ),
                });
            }
        }
        debug!(root = %root.alias, ears = program.ears().len(), "join tree decided");

        let parent_child_columns = self.parent_child_columns(&program);
        Ok(Plan {
            program,
            root,
            parent_child_columns,
            classes: AttributeClasses::from_union_find(&mut self.attr_uf),
        })
    }

    /// Candidate aliases for one iteration: every relation on the first
    /// pass, afterwards the previous parents that did not themselves become
    /// ears, extended with any representative never touched by a semi-join.
    fn candidates(
        &mut self,
        first: bool,
        prev_parents: &[String],
        prev_ears: &HashSet<String>,
    ) -> Vec<String> {
        let mut candidates: Vec<String> = if first {
            self.relations.keys().cloned().collect()
        } else {
            let mut c: Vec<String> = prev_parents
                .iter()
                .filter(|p| !prev_ears.contains(*p))
                .cloned()
                .collect();
            for rep in self.rel_uf.representatives() {
                if !self.touched.contains(&rep) {
                    c.push(rep);
                }
            }
            c
        };
        candidates.sort();
        candidates.dedup();
        candidates
    }

    fn remove_ears(
        &mut self,
        candidates: &[String],
        total: usize,
    ) -> Result<Level, CompileError> {
        let mut level = Level::new();
        for ear_alias in candidates {
            if self.removed.contains(ear_alias) || Some(ear_alias) == self.root.as_ref() {
                continue;
            }
            for parent_alias in candidates {
                if parent_alias == ear_alias || self.removed.contains(parent_alias) {
                    continue;
                }
                // Edges inside one component never reduce the hypergraph and
                // would break the tree shape.
                if self.rel_uf.connected(ear_alias, parent_alias) {
                    continue;
                }
                // Pure while every component is still a singleton; the first
                // removal already relaxes the test for the rest of the pass.
                let pure = self.rel_uf.num_sets() == total;
                if !self.is_ear(ear_alias, parent_alias, pure) {
                    continue;
                }
                if !self.joinable(ear_alias, parent_alias) {
                    return Err(CompileError::UnjoinableEar {
                        ear: ear_alias.clone(),
                        parent: parent_alias.clone(),
                    });
                }

                let ear = self.relations[ear_alias].clone();
                let parent = self.relations[parent_alias].clone();
                trace!(ear = %ear.alias, parent = %parent.alias, "ear removed");
                self.removed.insert(ear_alias.clone());
                self.touched.insert(ear_alias.clone());
                self.touched.insert(parent_alias.clone());
                self.drop_ear_attributes(ear_alias);
                self.rel_uf.union(ear_alias, parent_alias);
                level.append(SemiJoin {
                    score: ear.size,
                    ear,
                    parent,
                });
                break;
            }
        }
        Ok(level)
    }

    /// The ear test.
    ///
    /// Pure mode (first iteration, all components still singletons): every
    /// attribute of the candidate must be equated with some attribute of the
    /// prospective parent. Non-pure mode additionally accepts attributes
    /// that are private — carried by the candidate alone, or by at most one
    /// other alias that is not the prospective parent.
    fn is_ear(&mut self, candidate: &str, other: &str, pure: bool) -> bool {
        let candidate_attrs = self.relations[candidate].attributes.clone();
        let other_rel = self.relations[other].clone();
        candidate_attrs.iter().all(|attribute| {
            let equated = other_rel
                .attributes
                .iter()
                .any(|b| self.attr_uf.connected(attribute, b));
            if pure {
                return equated;
            }
            let multiplicity = self
                .attr_aliases
                .get(&attribute.column)
                .map_or(0, Vec::len);
            multiplicity == 1
                || (multiplicity <= 2 && !other_rel.carries(&attribute.column))
                || equated
        })
    }

    /// At least one attribute pair of the two relations is equated.
    fn joinable(&mut self, ear: &str, parent: &str) -> bool {
        let ear_attrs = self.relations[ear].attributes.clone();
        let parent_attrs = self.relations[parent].attributes.clone();
        ear_attrs
            .iter()
            .any(|a| parent_attrs.iter().any(|b| self.attr_uf.connected(a, b)))
    }

    /// Remove one occurrence of the ear from every column it carries.
    fn drop_ear_attributes(&mut self, ear: &str) {
        let attributes = self.relations[ear].attributes.clone();
        for attribute in attributes {
            if let Some(aliases) = self.attr_aliases.get_mut(&attribute.column) {
                if let Some(pos) = aliases.iter().position(|a| a == ear) {
                    aliases.remove(pos);
                }
            }
        }
    }

    /// Physical column pairs for every (ear, parent) edge: all attribute
    /// pairs of the two relations that sit in one equivalence class.
    fn parent_child_columns(&mut self, program: &SemiJoinProgram) -> Vec<ParentChildColumns> {
        let mut pairs = Vec::new();
        for entry in program.entries() {
            for ear in &entry.ears {
                for child_attr in &ear.attributes {
                    for parent_attr in &entry.parent.attributes {
                        if self.attr_uf.connected(child_attr, parent_attr) {
                            pairs.push(ParentChildColumns {
                                parent_alias: entry.parent.alias.clone(),
                                child_alias: ear.alias.clone(),
                                parent_column: parent_attr.column.clone(),
                                child_column: child_attr.column.clone(),
                            });
                        }
                    }
                }
            }
        }
        pairs
    }
}

/// Domain root policy: whenever a selected relation maps to `name` or
/// `cast_info`, the `cast_info` relation drives the final loop. Otherwise
/// the planner lets ear removal decide (the last survivor becomes the root).
fn select_root(ir: &QueryIr, relations: &BTreeMap<String, Relation>) -> Option<String> {
    let selects_people = ir
        .tables
        .values()
        .any(|info| {
            !info.min_select.is_empty()
                && matches!(info.relation_name.as_str(), "name" | "cast_info")
        });
    if !selects_people {
        return None;
    }
    relations
        .values()
        .find(|relation| relation.name == "cast_info")
        .map(|relation| relation.alias.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build_query_ir;
    use crate::parser::parse_sql;
    use crate::test_utils::{job_catalog, job_stats};

    fn plan(sql: &str, stats: &[(&str, u64)]) -> Result<Plan, CompileError> {
        let statements = parse_sql(sql).unwrap();
        let ir = build_query_ir(&statements, &job_stats(stats), &job_catalog()).unwrap();
        decide_join_tree(&ir)
    }

    #[test]
    fn single_relation_is_its_own_root() {
        let plan = plan(
            "SELECT MIN(t.title) FROM title t WHERE t.production_year = 2007",
            &[("q1x_title", 100)],
        )
        .unwrap();
        assert!(plan.program.is_empty());
        assert_eq!(plan.root.alias, "t");
        assert!(plan.parent_child_columns.is_empty());
    }

    #[test]
    fn two_table_pk_join_puts_dimension_under_fact() {
        let plan = plan(
            "SELECT MIN(t.title) FROM title t, kind_type kt \
             WHERE t.kind_id = kt.id AND kt.kind = 'movie'",
            &[("q1x_title", 100), ("q1x_kind_type", 1)],
        )
        .unwrap();
        assert_eq!(plan.root.alias, "t");
        let entries = plan.program.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].parent.alias, "t");
        assert_eq!(entries[0].ears[0].alias, "kt");
        let pairs = plan.columns_between("t", "kt");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].parent_column, "kind_id");
        assert_eq!(pairs[0].child_column, "id");
    }

    #[test]
    fn three_table_chain_reduces_to_title_root() {
        let plan = plan(
            "SELECT MIN(t.title) FROM title t, movie_keyword mk, keyword k \
             WHERE t.id = mk.movie_id AND mk.keyword_id = k.id \
               AND k.keyword = 'character-name-in-title'",
            &[
                ("q1x_title", 1000),
                ("q1x_movie_keyword", 500),
                ("q1x_keyword", 1),
            ],
        )
        .unwrap();
        assert_eq!(plan.root.alias, "t");
        let aliases = plan.program.aliases();
        assert_eq!(aliases.len(), 3);
        // k hangs below mk, mk below t.
        assert_eq!(plan.program.parent_of("k").unwrap().alias, "mk");
        assert_eq!(plan.program.parent_of("mk").unwrap().alias, "t");
        // Children are materialized before the entries that consume them.
        let entries = plan.program.entries();
        let mk_parent_pos = entries
            .iter()
            .position(|e| e.parent.alias == "mk")
            .unwrap();
        let t_parent_pos = entries.iter().position(|e| e.parent.alias == "t").unwrap();
        assert!(mk_parent_pos < t_parent_pos);
    }

    #[test]
    fn cast_info_is_forced_root_for_person_queries() {
        let plan = plan(
            "SELECT MIN(chn.name), MIN(n.name) \
             FROM cast_info ci, char_name chn, name n \
             WHERE ci.person_role_id = chn.id AND ci.person_id = n.id",
            &[
                ("q1x_cast_info", 1000),
                ("q1x_char_name", 50),
                ("q1x_name", 40),
            ],
        )
        .unwrap();
        assert_eq!(plan.root.alias, "ci");
        assert_eq!(plan.program.parent_of("chn").unwrap().alias, "ci");
        assert_eq!(plan.program.parent_of("n").unwrap().alias, "ci");
    }

    #[test]
    fn star_join_covers_all_relations_with_title_root() {
        let plan = plan(
            "SELECT MIN(t.title) \
             FROM title t, movie_keyword mk, movie_companies mc, kind_type kt \
             WHERE t.id = mk.movie_id AND t.id = mc.movie_id AND t.kind_id = kt.id",
            &[
                ("q1x_title", 1000),
                ("q1x_movie_keyword", 300),
                ("q1x_movie_companies", 200),
                ("q1x_kind_type", 4),
            ],
        )
        .unwrap();
        assert_eq!(plan.root.alias, "t");
        assert_eq!(plan.program.ears().len(), 3);
        // mc attaches to mk through the shared movie_id class; its entry
        // must be materialized before the root's entry consumes mk.
        assert_eq!(plan.program.parent_of("mc").unwrap().alias, "mk");
        let entries = plan.program.entries();
        let mk_pos = entries.iter().position(|e| e.parent.alias == "mk").unwrap();
        let t_pos = entries.iter().position(|e| e.parent.alias == "t").unwrap();
        assert!(mk_pos < t_pos);
        // Scores aggregate per parent: kt + mk under t.
        assert_eq!(entries[t_pos].score, 300 + 4);
    }

    #[test]
    fn cross_join_is_rejected() {
        let err = plan(
            "SELECT MIN(t.title) FROM title t, keyword k \
             WHERE t.production_year = 2000 AND k.keyword = 'x'",
            &[("q1x_title", 10), ("q1x_keyword", 1)],
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnjoinableEar { .. }));
    }

    #[test]
    fn coverage_invariant_holds() {
        let plan = plan(
            "SELECT MIN(t.title) FROM title t, movie_keyword mk, keyword k \
             WHERE t.id = mk.movie_id AND mk.keyword_id = k.id",
            &[
                ("q1x_title", 10),
                ("q1x_movie_keyword", 20),
                ("q1x_keyword", 5),
            ],
        )
        .unwrap();
        let mut aliases = plan.program.aliases();
        aliases.insert(plan.root.alias.clone());
        assert_eq!(aliases.len(), 3);
        // No alias appears as ear twice.
        let ears: Vec<_> = plan.program.ears();
        let unique: HashSet<_> = ears.iter().map(|e| e.alias.as_str()).collect();
        assert_eq!(ears.len(), unique.len());
    }
}
