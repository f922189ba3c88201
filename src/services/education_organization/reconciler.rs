use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::database::models::{EducationOrganizationMirror, OdsInstance};
use crate::services::education_organization::fetcher::SourceEducationOrganization;

/// Writes needed to bring one instance's mirror in line with its source snapshot.
/// No id appears in more than one list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub to_insert: Vec<EducationOrganizationMirror>,
    pub to_update: Vec<EducationOrganizationMirror>,
    pub to_delete: Vec<EducationOrganizationMirror>,
}

impl ReconcilePlan {
    /// Rows added or refreshed by this plan
    pub fn upserted_count(&self) -> usize {
        self.to_insert.len() + self.to_update.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Full-replacement diff of one instance's mirror against a source snapshot.
///
/// Source rows with an existing mirror become updates, the rest inserts, and
/// mirror rows whose id is missing from the source are deleted. When an id shows
/// up more than once in the source the last occurrence wins.
pub fn reconcile(
    instance: &OdsInstance,
    source: &[SourceEducationOrganization],
    mut existing: HashMap<i64, EducationOrganizationMirror>,
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let mut latest: Vec<&SourceEducationOrganization> = Vec::with_capacity(source.len());
    let mut positions: HashMap<i64, usize> = HashMap::with_capacity(source.len());
    for record in source {
        match positions.get(&record.education_organization_id) {
            Some(&at) => latest[at] = record,
            None => {
                positions.insert(record.education_organization_id, latest.len());
                latest.push(record);
            }
        }
    }

    let source_ids: HashSet<i64> = positions.keys().copied().collect();
    let mut plan = ReconcilePlan::default();

    for record in latest {
        match existing.remove(&record.education_organization_id) {
            Some(mut mirror) => {
                mirror.name_of_institution = record.name_of_institution.clone();
                mirror.short_name_of_institution = record.short_name_of_institution.clone();
                mirror.discriminator = record.discriminator.clone();
                mirror.parent_id = record.parent_id;
                mirror.last_modified_date = now;
                mirror.last_refreshed = now;
                plan.to_update.push(mirror);
            }
            None => plan.to_insert.push(EducationOrganizationMirror {
                education_organization_id: record.education_organization_id,
                instance_id: instance.ods_instance_id,
                instance_name: instance.name.clone(),
                name_of_institution: record.name_of_institution.clone(),
                short_name_of_institution: record.short_name_of_institution.clone(),
                discriminator: record.discriminator.clone(),
                external_row_id: record.id,
                parent_id: record.parent_id,
                last_modified_date: now,
                last_refreshed: now,
            }),
        }
    }

    plan.to_delete = existing
        .into_values()
        .filter(|mirror| !source_ids.contains(&mirror.education_organization_id))
        .collect();
    plan.to_delete.sort_by_key(|m| m.education_organization_id);
    plan
}
