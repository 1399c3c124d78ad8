//! Ref enumeration tables: `dolt_branches`, `dolt_remote_branches`,
//! `dolt_remotes`, `dolt_tags`.

use serde_json::{json, Value};

use crate::db::error::DbResult;
use crate::db::names;
use crate::dtables::{ResolveCtx, SysRow, SystemTable};
use crate::schema::{Schema, SchemaBuilder, SqlType};
use crate::storage::CommitGraph;

fn branch_schema() -> Schema {
    SchemaBuilder::new(0)
        .add_pk_column("name", SqlType::Text)
        .add_column("hash", SqlType::Text)
        .add_column("latest_committer", SqlType::Text)
        .add_column("latest_committer_email", SqlType::Text)
        .add_column("latest_commit_date", SqlType::Timestamp)
        .add_column("latest_commit_message", SqlType::Text)
        .build()
        .expect("branches schema")
}

/// `dolt_branches`: local branches and their head commit metadata.
pub struct BranchesTable {
    graph: CommitGraph,
}

pub(crate) fn construct_branches(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Branches(BranchesTable {
        graph: ctx.graph.clone(),
    })))
}

impl BranchesTable {
    pub fn name(&self) -> String {
        names::BRANCHES_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        branch_schema()
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for branch in self.graph.branches()? {
            let head = self.graph.branch_head(&branch)?;
            let mut row = SysRow::new();
            row.insert("name".to_string(), json!(branch.as_str()));
            row.insert("hash".to_string(), json!(head.id.to_string()));
            row.insert("latest_committer".to_string(), json!(head.author_name));
            row.insert(
                "latest_committer_email".to_string(),
                json!(head.author_email),
            );
            row.insert(
                "latest_commit_date".to_string(),
                json!(head.timestamp.timestamp()),
            );
            row.insert("latest_commit_message".to_string(), json!(head.summary()));
            rows.push(row);
        }
        Ok(rows)
    }
}

/// `dolt_remote_branches`: remote-tracking branches.
pub struct RemoteBranchesTable {
    graph: CommitGraph,
}

pub(crate) fn construct_remote_branches(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::RemoteBranches(RemoteBranchesTable {
        graph: ctx.graph.clone(),
    })))
}

impl RemoteBranchesTable {
    pub fn name(&self) -> String {
        names::REMOTE_BRANCHES_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        branch_schema()
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for (name, id) in self.graph.remote_branches()? {
            let head = self.graph.commit(id)?;
            let mut row = SysRow::new();
            row.insert("name".to_string(), json!(name));
            row.insert("hash".to_string(), json!(head.id.to_string()));
            row.insert("latest_committer".to_string(), json!(head.author_name));
            row.insert(
                "latest_committer_email".to_string(),
                json!(head.author_email),
            );
            row.insert(
                "latest_commit_date".to_string(),
                json!(head.timestamp.timestamp()),
            );
            row.insert("latest_commit_message".to_string(), json!(head.summary()));
            rows.push(row);
        }
        Ok(rows)
    }
}

/// `dolt_remotes`: configured remotes.
pub struct RemotesTable {
    graph: CommitGraph,
}

pub(crate) fn construct_remotes(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Remotes(RemotesTable {
        graph: ctx.graph.clone(),
    })))
}

impl RemotesTable {
    pub fn name(&self) -> String {
        names::REMOTES_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("name", SqlType::Text)
            .add_column("url", SqlType::Text)
            .build()
            .expect("remotes schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for remote in self.graph.remotes()? {
            let mut row = SysRow::new();
            row.insert("name".to_string(), json!(remote.name));
            row.insert("url".to_string(), json!(remote.url));
            rows.push(row);
        }
        Ok(rows)
    }
}

/// `dolt_tags`: tags with tagger metadata.
pub struct TagsTable {
    graph: CommitGraph,
}

pub(crate) fn construct_tags(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Tags(TagsTable {
        graph: ctx.graph.clone(),
    })))
}

impl TagsTable {
    pub fn name(&self) -> String {
        names::TAGS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("tag_name", SqlType::Text)
            .add_column("tag_hash", SqlType::Text)
            .add_column("tagger", SqlType::Text)
            .add_column("email", SqlType::Text)
            .add_column("date", SqlType::Timestamp)
            .add_column("message", SqlType::Text)
            .build()
            .expect("tags schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for tag in self.graph.tags()? {
            let mut row = SysRow::new();
            row.insert("tag_name".to_string(), json!(tag.name.as_str()));
            row.insert("tag_hash".to_string(), json!(tag.target.to_string()));
            row.insert(
                "tagger".to_string(),
                tag.tagger_name.map_or(Value::Null, Value::from),
            );
            row.insert(
                "email".to_string(),
                tag.tagger_email.map_or(Value::Null, Value::from),
            );
            row.insert(
                "date".to_string(),
                tag.timestamp.map_or(Value::Null, |t| json!(t.timestamp())),
            );
            row.insert(
                "message".to_string(),
                tag.message.map_or(Value::Null, Value::from),
            );
            rows.push(row);
        }
        Ok(rows)
    }
}
