mod request;
mod response;

pub use request::{
    build_payload, instruction_text, GenerationPayload, PromptVersion, RequestPart, TryOnRequest,
    DEFAULT_IMAGE_MODEL, IMAGE_ONLY_DIRECTIVE,
};
pub use response::{decode_candidate_parts, ResponsePart};
