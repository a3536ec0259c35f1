mod grpc_timeout;

pub(crate) use self::grpc_timeout::{encode_grpc_timeout, parse_grpc_timeout, GrpcTimeout};
