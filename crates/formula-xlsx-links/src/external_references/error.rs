use thiserror::Error;

use crate::XlsxError;

#[derive(Debug, Error)]
pub enum ExternalLinkError {
    #[error("external link index {index} is out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("external link does not belong to this workbook")]
    NotFound,
    #[error("missing relationship {id} declared by {part}")]
    MissingRelationship { part: String, id: String },
    #[error("formula link rewrite failed: {0}")]
    FormulaRewrite(String),
    #[error("failed to load external workbook {uri}: {reason}")]
    Load { uri: String, reason: String },
    #[error(transparent)]
    Xlsx(#[from] XlsxError),
}
