use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let orchestrator = Service::builder()
        .name("Orchestrator")
        .package("calc")
        .method(method("register_new_agent", "RegisterNewAgent", "Empty", "AgentId"))
        .method(method("remove_agent", "RemoveAgent", "AgentId", "Empty"))
        .method(method("heartbeat", "Heartbeat", "HeartbeatRequest", "Empty"))
        .method(method(
            "get_expression_to_evaluate",
            "GetExpressionToEvaluate",
            "AgentId",
            "ExpressionTask",
        ))
        .method(method(
            "give_result_of_expression",
            "GiveResultOfExpression",
            "ResultOfExpression",
            "Empty",
        ))
        .method(method(
            "abandon_expression",
            "AbandonExpression",
            "AbandonRequest",
            "Empty",
        ))
        .build();

    let calculator = Service::builder()
        .name("Calculator")
        .package("calc")
        .method(method(
            "submit_expression",
            "SubmitExpression",
            "SubmitExpressionRequest",
            "SubmitExpressionResponse",
        ))
        .method(method("get_expression", "GetExpression", "ExpressionId", "ExpressionInfo"))
        .method(method(
            "list_expressions",
            "ListExpressions",
            "ListExpressionsRequest",
            "ListExpressionsResponse",
        ))
        .method(method("get_result", "GetResult", "ExpressionId", "ResultResponse"))
        .method(method("list_agents", "ListAgents", "Empty", "ListAgentsResponse"))
        .build();

    println!("cargo:rerun-if-changed=build.rs");
    Builder::new().compile(&[orchestrator, calculator]);
}
