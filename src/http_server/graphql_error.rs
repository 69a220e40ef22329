use async_graphql::{Error, ErrorExtensions};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphqlError {
    #[error("Server error: {0}")]
    ServerError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Failed to get app state")]
    FailedToGetAppState,
}

impl GraphqlError {
    fn code(&self) -> &'static str {
        match self {
            GraphqlError::ServerError(_) | GraphqlError::FailedToGetAppState => "SERVER_ERROR",
            GraphqlError::InvalidInput(_) => "BAD_REQUEST",
            GraphqlError::NotFound(_) => "NOT_FOUND",
        }
    }
}

impl From<color_eyre::Report> for GraphqlError {
    fn from(report: color_eyre::Report) -> Self {
        log::error!("GraphQL error: {:#?}", report);
        Self::ServerError(report.to_string())
    }
}

impl ErrorExtensions for GraphqlError {
    fn extend(&self) -> Error {
        Error::new(self.to_string()).extend_with(|_err, e| {
            e.set("code", self.code());
            match self {
                GraphqlError::ServerError(reason) | GraphqlError::InvalidInput(reason) => {
                    e.set("reason", reason.clone())
                }
                GraphqlError::NotFound(what) => e.set("reason", format!("{what} not found")),
                GraphqlError::FailedToGetAppState => {
                    e.set("reason", "Failed to get app state".to_string())
                }
            }
        })
    }
}

// Newtype so `?` works on both GraphqlError and color_eyre::Report without
// clashing with async_graphql's blanket `From<E: Display>` for `Error`
#[derive(Debug, Clone)]
pub struct GraphqlErrorWrapper(GraphqlError);

impl From<GraphqlError> for GraphqlErrorWrapper {
    fn from(err: GraphqlError) -> Self {
        Self(err)
    }
}

impl From<GraphqlErrorWrapper> for Error {
    fn from(wrapper: GraphqlErrorWrapper) -> Self {
        wrapper.0.extend()
    }
}

impl From<color_eyre::Report> for GraphqlErrorWrapper {
    fn from(report: color_eyre::Report) -> Self {
        GraphqlError::from(report).into()
    }
}

pub type GraphqlResult<T> = Result<T, GraphqlErrorWrapper>;
