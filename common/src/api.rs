pub const PATH_LIGHT: &str = "/api/light";
pub const PATH_TEMP: &str = "/api/temp";

pub const HEADER_API_KEY: &str = "api-key";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";

pub fn light_url(endpoint: &str) -> String {
    join_url(endpoint, PATH_LIGHT)
}

pub fn temp_url(endpoint: &str) -> String {
    join_url(endpoint, PATH_TEMP)
}

fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim().trim_end_matches('/'), path)
}
