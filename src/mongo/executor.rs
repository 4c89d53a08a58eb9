use super::{error_code, INDEX_NOT_FOUND_CODE, NAMESPACE_EXISTS_CODE, NAMESPACE_NOT_FOUND_CODE};
use crate::{DocumentExecutor, IndexSpec, TideError};
use mongodb::bson::Document;
use mongodb::options::IndexOptions;
use mongodb::sync::Database;
use mongodb::IndexModel;

/// `DocumentExecutor` over a blocking MongoDB database handle
///
/// The handle is a cheap clone of the driver's pooled client.
#[derive(Clone, Debug)]
pub struct MongoExecutor {
    database: Database,
}

impl MongoExecutor {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

fn index_model(index: &IndexSpec) -> IndexModel {
    let options = IndexOptions::builder()
        .name(Some(index.name.clone()))
        .unique(index.unique.then_some(true))
        .sparse(index.sparse.then_some(true))
        .expire_after(index.expire_after)
        .build();

    IndexModel::builder()
        .keys(index.keys.clone())
        .options(Some(options))
        .build()
}

impl DocumentExecutor for MongoExecutor {
    fn run_command(&self, command: Document) -> Result<Document, TideError> {
        Ok(self.database.run_command(command, None)?)
    }

    fn create_collection(&self, name: &str) -> Result<(), TideError> {
        match self.database.create_collection(name, None) {
            Ok(()) => Ok(()),
            Err(e) if error_code(&e) == Some(NAMESPACE_EXISTS_CODE) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn drop_collection(&self, name: &str) -> Result<(), TideError> {
        Ok(self.database.collection::<Document>(name).drop(None)?)
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<(), TideError> {
        log::debug!(target: "tidemark::mongo", "ensuring index '{}' on '{}'", index.name, collection);
        self.database
            .collection::<Document>(collection)
            .create_index(index_model(index), None)?;
        Ok(())
    }

    fn drop_index(&self, collection: &str, name: &str) -> Result<(), TideError> {
        match self.database.collection::<Document>(collection).drop_index(name, None) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    error_code(&e),
                    Some(INDEX_NOT_FOUND_CODE) | Some(NAMESPACE_NOT_FOUND_CODE)
                ) =>
            {
                Err(TideError::NotFound(format!("index '{name}' on '{collection}'")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_index_names(&self, collection: &str) -> Result<Vec<String>, TideError> {
        match self.database.collection::<Document>(collection).list_index_names() {
            Ok(names) => Ok(names),
            Err(e) if error_code(&e) == Some(NAMESPACE_NOT_FOUND_CODE) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn update_many(&self, collection: &str, filter: Document, update: Document) -> Result<u64, TideError> {
        let result = self
            .database
            .collection::<Document>(collection)
            .update_many(filter, update, None)?;
        Ok(result.modified_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use std::time::Duration;

    #[test]
    fn test_index_model_carries_options() {
        let spec = IndexSpec::new("audit_ttl", doc! { "created_at": 1 })
            .unique()
            .expire_after(Duration::from_secs(60));
        let model = index_model(&spec);

        assert_eq!(model.keys, doc! { "created_at": 1 });
        let options = model.options.unwrap_or_default();
        assert_eq!(options.name.as_deref(), Some("audit_ttl"));
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, None);
        assert_eq!(options.expire_after, Some(Duration::from_secs(60)));
    }
}
