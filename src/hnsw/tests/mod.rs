mod tests_graph;
