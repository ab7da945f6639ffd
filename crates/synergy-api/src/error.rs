use axum::{
    Json,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use tracing::error;

use synergy_gateway::MessagingError;
use synergy_types::api::ErrorBody;

/// HTTP rendering of [`MessagingError`]: status code plus
/// `{success: false, message, code}`.
#[derive(Debug)]
pub struct ApiError(pub MessagingError);

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MessagingError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            MessagingError::Forbidden(_) => StatusCode::FORBIDDEN,
            MessagingError::NotFound(_) => StatusCode::NOT_FOUND,
            MessagingError::InvalidArgument(_) | MessagingError::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            MessagingError::Conflict(_) => StatusCode::CONFLICT,
            MessagingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let MessagingError::Internal(detail) = &self.0 {
            error!("Internal error: {}", detail);
        }

        let body = ErrorBody {
            success: false,
            message: self.0.public_message(),
            code: self.0.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// JSON body extractor whose rejections use the standard error body.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Payload(value)),
            Err(rejection) => Err(ApiError(MessagingError::InvalidArgument(rejection.body_text()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let cases = [
            (MessagingError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (MessagingError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (MessagingError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (MessagingError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (MessagingError::InvalidOperation("x".into()), StatusCode::BAD_REQUEST),
            (MessagingError::Conflict("x".into()), StatusCode::CONFLICT),
            (MessagingError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
