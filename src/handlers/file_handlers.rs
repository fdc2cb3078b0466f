//! HTTP handlers for file upload, retrieval and metadata listing.
//! Parsing lives here; every rule about files lives in `FileService`.

use crate::{
    errors::AppError,
    models::{
        record::FileRecord,
        upload::{FileContent, FileUpdate, NewFile, QueryType},
    },
    services::{
        file_service::{FileError, FileService},
        query::{SortSpec, parse_owner_list},
    },
};
use axum::{
    Form, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sort parameters shared by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub sort_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ListParams {
    fn sort_spec(&self) -> Result<SortSpec, FileError> {
        Ok(SortSpec::from_params(
            self.sort_type.as_deref(),
            self.start_date.as_deref(),
            self.end_date.as_deref(),
        )?)
    }
}

/// Form body of `POST /api/files/filter-by-user`.
#[derive(Debug, Default, Deserialize)]
pub struct OwnerFilter {
    /// Comma-separated owner names.
    #[serde(default)]
    pub users: String,
    pub sort_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// `?owner=` on single-file endpoints.
#[derive(Debug, Deserialize)]
pub struct OwnerParam {
    #[serde(default)]
    pub owner: String,
}

/// Record plus base64-encoded content, as returned by retrieve.
#[derive(Debug, Serialize)]
pub struct RetrievedFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub content: String,
}

impl RetrievedFile {
    fn new(record: FileRecord, content: &[u8]) -> Self {
        Self {
            record,
            content: general_purpose::STANDARD.encode(content),
        }
    }
}

/// Fields collected from an upload multipart body.
#[derive(Debug, Default)]
struct UploadForm {
    query_type: Option<String>,
    file_id: Option<String>,
    owner: Option<String>,
    description: Option<String>,
    content: Option<FileContent>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await?;
                    // Browsers send an empty part when no file was picked.
                    if !bytes.is_empty() {
                        form.content = Some(FileContent::new(bytes, content_type));
                    }
                }
                "file_id" => form.file_id = Some(field.text().await?),
                "owner" => form.owner = Some(field.text().await?),
                "description" => form.description = Some(field.text().await?),
                "query_type" => form.query_type = Some(field.text().await?),
                other => debug!("ignoring multipart field `{}`", other),
            }
        }
        Ok(form)
    }

    fn into_new_file(self) -> Result<NewFile, AppError> {
        let content = self
            .content
            .ok_or_else(|| AppError::bad_request("file is required"))?;
        Ok(NewFile {
            file_id: self.file_id.unwrap_or_default(),
            owner: self.owner.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            content,
        })
    }

    fn into_update(self, file_id: String) -> FileUpdate {
        FileUpdate {
            file_id,
            owner: self.owner.unwrap_or_default(),
            description: self.description,
            content: self.content,
        }
    }
}

/// `GET /api/files`: all records, sorted or filtered.
pub async fn list_files(
    State(service): State<FileService>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let spec = params.sort_spec()?;
    Ok(Json(service.list_files(&spec).await?))
}

/// `POST /api/files/filter-by-date`: form-encoded variant of `list_files`.
pub async fn filter_by_date(
    State(service): State<FileService>,
    Form(params): Form<ListParams>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let spec = params.sort_spec()?;
    Ok(Json(service.list_files(&spec).await?))
}

/// `POST /api/files/filter-by-user`: records of the listed owners, grouped by owner.
pub async fn filter_by_user(
    State(service): State<FileService>,
    Form(filter): Form<OwnerFilter>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let owners = parse_owner_list(&filter.users);
    let spec = ListParams {
        sort_type: filter.sort_type,
        start_date: filter.start_date,
        end_date: filter.end_date,
    }
    .sort_spec()?;
    Ok(Json(service.list_files_by_owners(&owners, &spec).await?))
}

/// `POST /api/files`: store a new file.
pub async fn create_file(
    State(service): State<FileService>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileRecord>), AppError> {
    let new = UploadForm::read(multipart).await?.into_new_file()?;
    let record = service.create(new).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /api/files/{file_id}`: replace description and/or content.
pub async fn update_file(
    State(service): State<FileService>,
    Path(file_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<FileRecord>, AppError> {
    let update = UploadForm::read(multipart).await?.into_update(file_id);
    Ok(Json(service.update(update).await?))
}

/// `GET /api/files/{file_id}?owner=`: record and content.
pub async fn retrieve_file(
    State(service): State<FileService>,
    Path(file_id): Path<String>,
    Query(param): Query<OwnerParam>,
) -> Result<Json<RetrievedFile>, AppError> {
    let (record, content) = service.retrieve(&file_id, &param.owner).await?;
    Ok(Json(RetrievedFile::new(record, &content)))
}

/// `DELETE /api/files/{file_id}?owner=`: remove file and record.
pub async fn delete_file(
    State(service): State<FileService>,
    Path(file_id): Path<String>,
    Query(param): Query<OwnerParam>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.delete(&file_id, &param.owner).await?))
}

/// `POST /api/files/upload`: single multipart endpoint dispatching on `query_type`.
pub async fn upload(
    State(service): State<FileService>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = UploadForm::read(multipart).await?;
    let query_type = form
        .query_type
        .as_deref()
        .ok_or_else(|| AppError::bad_request("query_type is required"))?
        .parse::<QueryType>()
        .map_err(AppError::bad_request)?;

    let response = match query_type {
        QueryType::Create => {
            let record = service.create(form.into_new_file()?).await?;
            (StatusCode::CREATED, Json(record)).into_response()
        }
        QueryType::Update => {
            let file_id = form.file_id.clone().unwrap_or_default();
            Json(service.update(form.into_update(file_id)).await?).into_response()
        }
        QueryType::Delete => {
            let record = service
                .delete(
                    form.file_id.as_deref().unwrap_or_default(),
                    form.owner.as_deref().unwrap_or_default(),
                )
                .await?;
            Json(record).into_response()
        }
        QueryType::Retrieve => {
            let (record, content) = service
                .retrieve(
                    form.file_id.as_deref().unwrap_or_default(),
                    form.owner.as_deref().unwrap_or_default(),
                )
                .await?;
            Json(RetrievedFile::new(record, &content)).into_response()
        }
    };
    Ok(response)
}
