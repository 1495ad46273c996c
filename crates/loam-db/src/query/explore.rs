//! Foreign-key graph exploration.
//!
//! Starting from the root model, walk every foreign key that currently
//! holds a cached instance, depth-first and root-first, and decide which
//! of the reachable tables must actually be joined. With an explicit
//! projection only joins whose subtree contains a selected field are
//! kept; usefulness is therefore computed bottom-up and useless branches
//! are discarded post-order. Without a projection every reachable table
//! is joined.

use std::cell::RefCell;
use std::collections::HashSet;

use tracing::warn;

use crate::fields::Field;
use crate::model::{Model, ModelInner};

/// One table reference in a SELECT, identified by its model and, except
/// for the root, the foreign key it was reached through.
pub(crate) struct Join {
    pub(crate) model: Model,
    /// Foreign key on the parent model this join was reached through.
    pub(crate) via: Option<Field>,
    /// Render as LEFT JOIN; nullability is inherited along the ancestry.
    pub(crate) nullable: bool,
}

/// Explores the graph and assigns each surviving join its alias slot,
/// `T0` for the root upwards in traversal order.
pub(crate) fn explore_joins(
    root: &Model,
    projection: &[Field],
    excluded: &[Field],
) -> Vec<Join> {
    let mut joins = Vec::new();
    let mut visited = HashSet::new();
    explore(root, None, false, projection, excluded, &mut visited, &mut joins);
    for (slot, join) in joins.iter().enumerate() {
        join.model.set_table_slot(slot);
    }
    joins
}

#[allow(clippy::too_many_arguments)]
fn explore(
    model: &Model,
    via: Option<&Field>,
    nullable: bool,
    projection: &[Field],
    excluded: &[Field],
    visited: &mut HashSet<*const RefCell<ModelInner>>,
    joins: &mut Vec<Join>,
) -> bool {
    if !visited.insert(model.identity()) {
        // A model instance reached twice means the foreign-key graph has
        // a cycle; join each instance at most once.
        warn!(
            table = %model.table_name(),
            "cyclic foreign-key graph, skipping already-joined model"
        );
        return false;
    }

    let index = joins.len();
    joins.push(Join {
        model: model.clone(),
        via: via.cloned(),
        nullable,
    });

    let mut useful =
        projection.is_empty() || projection.iter().any(|f| f.belongs_to(model));

    for fk in model.foreign_keys() {
        if excluded.iter().any(|e| e == &fk) {
            continue;
        }
        // A foreign key with no cached instance is a dead end.
        let Some(sub) = fk.related_model() else {
            continue;
        };
        let sub_nullable = nullable || fk.accepts_null();
        if explore(&sub, Some(&fk), sub_nullable, projection, excluded, visited, joins) {
            useful = true;
        }
    }

    // Post-order prune: a non-root join survives only if its subtree
    // contains a selected field. Useless descendants have already removed
    // themselves, so truncating drops exactly this join.
    if !useful && via.is_some() {
        joins.truncate(index);
    }
    useful
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_model;
    use crate::fields::{ForeignKey, StringField};
    use crate::model::Record;

    define_model! {
        pub struct Node("node") {
            name: StringField => "name",
            next: ForeignKey<Node> => "next" [null],
            other: ForeignKey<Node> => "other" [null],
        }
    }

    #[test]
    fn chain_to_a_useful_leaf_is_kept_and_siblings_are_pruned() {
        let a = Node::new();
        let b = Node::new();
        let c = Node::new();
        let d = Node::new();
        a.next.set(&b);
        b.next.set(&c);
        a.other.set(&d);

        let projection = vec![(*c.name).clone()];
        let joins = explore_joins(a.model(), &projection, &[]);

        let tables: Vec<_> = joins.iter().map(|j| j.model.identity()).collect();
        assert_eq!(
            tables,
            vec![
                a.model().identity(),
                b.model().identity(),
                c.model().identity(),
            ]
        );
    }

    #[test]
    fn root_only_projection_yields_a_single_join() {
        let a = Node::new();
        let b = Node::new();
        a.next.set(&b);

        let projection = vec![(*a.name).clone()];
        let joins = explore_joins(a.model(), &projection, &[]);
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].model.identity(), a.model().identity());
    }

    #[test]
    fn without_a_projection_every_reachable_table_is_joined() {
        let a = Node::new();
        let b = Node::new();
        let c = Node::new();
        a.next.set(&b);
        a.other.set(&c);

        let joins = explore_joins(a.model(), &[], &[]);
        assert_eq!(joins.len(), 3);
    }

    #[test]
    fn nullability_is_inherited_from_the_join_ancestry() {
        define_model! {
            pub struct Strict("strict") {
                name: StringField => "name",
                req: ForeignKey<Strict> => "req",
                opt: ForeignKey<Strict> => "opt" [null],
            }
        }

        let a = Strict::new();
        let b = Strict::new();
        let c = Strict::new();
        a.opt.set(&b); // nullable hop
        b.req.set(&c); // non-null hop, still inherits nullability

        let joins = explore_joins(a.model(), &[], &[]);
        assert_eq!(joins.len(), 3);
        assert!(!joins[0].nullable);
        assert!(joins[1].nullable);
        assert!(joins[2].nullable);
    }

    #[test]
    fn excluded_foreign_keys_are_not_traversed() {
        let a = Node::new();
        let b = Node::new();
        let c = Node::new();
        a.next.set(&b);
        a.other.set(&c);

        let excluded = vec![(*a.other).clone()];
        let joins = explore_joins(a.model(), &[], &excluded);
        assert_eq!(joins.len(), 2);
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let a = Node::new();
        let b = Node::new();
        a.next.set(&b);
        b.next.set(&a); // cycle back to the root instance

        let joins = explore_joins(a.model(), &[], &[]);
        assert_eq!(joins.len(), 2);
    }
}
